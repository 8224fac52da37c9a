#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

pub const FARM_1_ID: &str = "farm-north";
pub const FARM_2_ID: &str = "farm-south";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap()
}
