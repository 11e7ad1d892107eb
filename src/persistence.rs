use crate::models::{BusStopsResponse, Stop};

use anyhow::{Context, Result};
use compact_str::CompactString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CATALOG_FILE: &str = "bus_stops_cache.json";
pub const PINS_KEY: &str = "pinned_bus_stops";

pub fn catalog_path(dir: &Path) -> PathBuf {
    dir.join(CATALOG_FILE)
}

pub fn pins_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.json", PINS_KEY))
}

/// Write to a sibling temp file, then rename over the destination so readers
/// never see a half-written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut w, value)?;
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(Some(value))
}

pub fn save_catalog(stops: &[Stop], dir: &Path) -> Result<()> {
    #[derive(Serialize)]
    struct CatalogFile<'a> {
        value: &'a [Stop],
    }
    write_json_atomic(&catalog_path(dir), &CatalogFile { value: stops })
}

pub fn load_catalog(dir: &Path) -> Result<Option<Vec<Stop>>> {
    let file: Option<BusStopsResponse> = read_json(&catalog_path(dir))?;
    Ok(file.map(|f| f.value))
}

pub fn save_pins(codes: &[CompactString], dir: &Path) -> Result<()> {
    write_json_atomic(&pins_path(dir), codes)
}

pub fn load_pins(dir: &Path) -> Result<Vec<CompactString>> {
    Ok(read_json(&pins_path(dir))?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(code: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            code: code.into(),
            road_name: format!("{} Road", code),
            description: format!("Stop {}", code),
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_catalog_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stops = vec![
            stop("01012", 1.29684825487647, 103.85253591654006),
            stop("01013", 1.29770970610083, 103.85315925432700),
        ];

        save_catalog(&stops, dir.path()).unwrap();
        let loaded = load_catalog(dir.path()).unwrap().unwrap();

        assert_eq!(loaded.len(), 2);
        for (a, b) in stops.iter().zip(&loaded) {
            assert_eq!(a.code, b.code);
            assert_eq!(a.latitude, b.latitude);
            assert_eq!(a.longitude, b.longitude);
        }
    }

    #[test]
    fn test_catalog_file_has_api_shape() {
        let dir = tempfile::tempdir().unwrap();
        save_catalog(&[stop("1", 0.0, 0.0)], dir.path()).unwrap();
        let raw = std::fs::read_to_string(catalog_path(dir.path())).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["value"][0]["BusStopCode"], "1");
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_catalog(dir.path()).unwrap().is_none());
        assert!(load_pins(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_catalog_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(catalog_path(dir.path()), b"{\"value\": [").unwrap();
        assert!(load_catalog(dir.path()).is_err());
    }

    #[test]
    fn test_pins_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let codes: Vec<CompactString> = vec!["20".into(), "03".into(), "11".into()];
        save_pins(&codes, dir.path()).unwrap();
        assert_eq!(load_pins(dir.path()).unwrap(), codes);
    }
}
