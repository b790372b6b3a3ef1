//! Static lookup tables standing in for real weather, clock, and routing services.
//!
//! Lookups never fail: unknown subjects resolve to a well-formed default record.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const MILES_TO_KM: f64 = 1.60934;

pub const DEFAULT_TEMPERATURE: i32 = 70;
pub const DEFAULT_CONDITION: &str = "Unknown";
pub const DEFAULT_TIME: &str = "12:00 PM UTC";
pub const DEFAULT_UNIT: &str = "fahrenheit";

static WEATHER: Lazy<HashMap<&'static str, (i32, &'static str)>> = Lazy::new(|| {
    HashMap::from([
        ("New York", (72, "Sunny")),
        ("London", (15, "Cloudy")),
        ("Tokyo", (25, "Rainy")),
        ("Paris", (18, "Partly Cloudy")),
    ])
});

static TIMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("New York", "10:30 AM EST"),
        ("London", "3:30 PM GMT"),
        ("Tokyo", "11:30 PM JST"),
        ("Paris", "4:30 PM CET"),
    ])
});

static DISTANCES: Lazy<HashMap<(&'static str, &'static str), u32>> = Lazy::new(|| {
    HashMap::from([
        (("New York", "London"), 3459),
        (("New York", "Paris"), 3625),
        (("London", "Paris"), 214),
        (("Tokyo", "New York"), 6737),
    ])
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub location: String,
    pub temperature: i32,
    pub unit: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub location: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceRecord {
    pub from: String,
    pub to: String,
    pub distance_miles: u32,
    pub distance_km: f64,
}

/// Weather for `location`. The unit is echoed back as given, no conversion happens.
pub fn lookup_weather(location: &str, unit: Option<&str>) -> WeatherRecord {
    let (temperature, condition) = WEATHER
        .get(location)
        .copied()
        .unwrap_or((DEFAULT_TEMPERATURE, DEFAULT_CONDITION));

    WeatherRecord {
        location: location.to_string(),
        temperature,
        unit: unit.unwrap_or(DEFAULT_UNIT).to_string(),
        condition: condition.to_string(),
    }
}

pub fn lookup_time(location: &str) -> TimeRecord {
    TimeRecord {
        location: location.to_string(),
        time: TIMES.get(location).copied().unwrap_or(DEFAULT_TIME).to_string(),
    }
}

/// Distance between two locations; the pair is order-insensitive and unknown pairs are 0.
pub fn lookup_distance(from: &str, to: &str) -> DistanceRecord {
    let miles = DISTANCES
        .get(&(from, to))
        .or_else(|| DISTANCES.get(&(to, from)))
        .copied()
        .unwrap_or(0);

    DistanceRecord {
        from: from.to_string(),
        to: to.to_string(),
        distance_miles: miles,
        distance_km: miles_to_km(miles),
    }
}

fn miles_to_km(miles: u32) -> f64 {
    (f64::from(miles) * MILES_TO_KM * 100.0).round() / 100.0
}
