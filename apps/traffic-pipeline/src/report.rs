use crate::store::SensorDataRow;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleTotal {
    pub timestamp: DateTime<Utc>,
    pub total_vehicle_count: i64,
}

#[derive(Serialize)]
struct CsvRecord {
    timestamp: String,
    total_vehicle_count: i64,
}

/// Sums vehicle counts across sensors sharing a timestamp, oldest first.
pub fn totals_by_timestamp(rows: &[SensorDataRow]) -> Vec<VehicleTotal> {
    let mut totals: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for row in rows {
        *totals.entry(row.timestamp).or_default() += i64::from(row.vehicle_count);
    }
    totals
        .into_iter()
        .map(|(timestamp, total_vehicle_count)| VehicleTotal {
            timestamp,
            total_vehicle_count,
        })
        .collect()
}

pub fn write_csv<W: Write>(totals: &[VehicleTotal], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for total in totals {
        writer
            .serialize(CsvRecord {
                timestamp: total.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                total_vehicle_count: total.total_vehicle_count,
            })
            .context("write report row")?;
    }
    if totals.is_empty() {
        writer
            .write_record(["timestamp", "total_vehicle_count"])
            .context("write report header")?;
    }
    writer.flush().context("flush report")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(sensor_id: i32, vehicle_count: i32, second: u32) -> SensorDataRow {
        SensorDataRow {
            sensor_id,
            vehicle_count,
            average_speed: 50.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[test]
    fn groups_and_orders_by_timestamp() {
        let rows = vec![row(1, 10, 5), row(2, 3, 0), row(3, 7, 5), row(4, 0, 2)];

        let totals = totals_by_timestamp(&rows);

        let counts: Vec<i64> = totals.iter().map(|t| t.total_vehicle_count).collect();
        assert_eq!(counts, vec![3, 0, 17]);
        assert!(totals.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    #[test]
    fn writes_header_and_millisecond_timestamps() {
        let totals = totals_by_timestamp(&[row(1, 12, 0), row(2, 8, 0)]);
        let mut out = Vec::new();

        write_csv(&totals, &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,total_vehicle_count\n2024-01-01T00:00:00.000Z,20\n"
        );
    }

    #[test]
    fn empty_report_still_has_a_header() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,total_vehicle_count\n"
        );
    }
}
