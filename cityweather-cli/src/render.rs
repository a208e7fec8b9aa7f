use std::fmt::Write;

use cityweather_core::{CandidateLocation, Phase, ScreenState, WeatherSnapshot};

pub fn snapshot(weather: &WeatherSnapshot) -> String {
    let mut out = String::new();
    let loc = &weather.location;
    let current = &weather.current;

    let _ = writeln!(out, "{}, {}", loc.name, loc.country);
    let _ = writeln!(out, "{}°  {}", current.temp_c, current.condition.text);

    let mut details = Vec::new();
    if let Some(feels) = current.feelslike_c {
        details.push(format!("feels like {feels}°"));
    }
    if let Some(humidity) = current.humidity {
        details.push(format!("humidity {humidity}%"));
    }
    if let Some(wind) = current.wind_kph {
        details.push(format!("wind {wind} km/h"));
    }
    if !details.is_empty() {
        let _ = writeln!(out, "{}", details.join(", "));
    }

    if !weather.forecast.forecastday.is_empty() {
        let _ = writeln!(out, "\nDaily forecast");
        for fd in &weather.forecast.forecastday {
            let _ = writeln!(
                out,
                "  {}  {:>5}°  ({}° / {}°)  {}",
                fd.date.format("%a %d %b"),
                fd.day.avgtemp_c,
                fd.day.mintemp_c,
                fd.day.maxtemp_c,
                fd.day.condition.text,
            );
        }
    }

    out
}

pub fn candidates(list: &[CandidateLocation]) -> String {
    let mut out = String::new();
    for loc in list {
        if loc.region.is_empty() {
            let _ = writeln!(out, "{loc}");
        } else {
            let _ = writeln!(out, "{} ({}), {}", loc.name, loc.region, loc.country);
        }
    }
    out
}

/// The forecast panel: spinner text, the snapshot, or the error with what is still on screen.
pub fn screen(state: &ScreenState) -> String {
    match &state.phase {
        Phase::Initializing => "Loading...\n".to_string(),
        Phase::Loading { city } => format!("Loading forecast for {city}...\n"),
        Phase::Ready => state.weather.as_ref().map(snapshot).unwrap_or_default(),
        Phase::Failed(err) => {
            let mut out = format!("{err}\n");
            if let Some(weather) = &state.weather {
                let _ = write!(out, "\nLast loaded:\n{}", snapshot(weather));
            }
            out
        }
    }
}
