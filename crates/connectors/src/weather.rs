//! Weather lookup.
//!
//! There is no weather provider behind this yet: every location gets the same
//! fair-weather snapshot so the tool-calling path can be exercised end to end.

use chatrelay_protocol::WeatherReport;

pub fn mock_weather(location: &str) -> WeatherReport {
    WeatherReport {
        location: location.trim().to_string(),
        temperature: "22°C".to_string(),
        condition: "Clear".to_string(),
        humidity: "65%".to_string(),
        wind: "SE 2m/s".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_trimmed_location() {
        let report = mock_weather("  Seoul ");
        assert_eq!(report.location, "Seoul");
        assert_eq!(report.temperature, "22°C");
    }
}
