use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::simulator::SimulatorConfig;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub input_file: String,
    pub output_file: Option<String>,
    /// Length of one outer step in seconds
    pub dt: f64,
    pub steps: usize,
    pub output_format: OutputFormat,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let input_file = matches
            .get_one::<String>("input")
            .ok_or_else(|| anyhow!("Input file is required"))?
            .clone();

        let output_file = matches.get_one::<String>("output").cloned();

        let verbose_level = matches.get_count("verbose");

        let output_format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("csv") | None => OutputFormat::Csv,
            Some("json") => OutputFormat::Json,
            Some(other) => return Err(anyhow!("Invalid output format '{}'", other)),
        };

        let dt = match matches.get_one::<String>("dt") {
            Some(value) => parse_time_value(value)?,
            None => 0.016,
        };
        if !(dt >= 0.0) {
            return Err(anyhow!("Time step must be non-negative, got {}", dt));
        }

        let steps = matches.get_one::<usize>("steps").copied().unwrap_or(1);

        Ok(CliArgs {
            input_file,
            output_file,
            dt,
            steps,
            output_format,
            verbose_level,
        })
    }
}

/// A circuit plus solver settings, read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub title: String,
    pub circuit: Circuit,
    #[serde(default)]
    pub config: SimulatorConfig,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Cannot open scenario '{}'", path.display()))?;
        let scenario: Scenario = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed scenario '{}'", path.display()))?;
        scenario.circuit.validate()?;
        Ok(scenario)
    }
}

/// Parse time value with unit (e.g., "16ms", "1.5us", "10ns")
pub fn parse_time_value(value: &str) -> Result<f64> {
    let value = value.trim().to_lowercase();

    let (number, scale) = if let Some(num_str) = value.strip_suffix("fs") {
        (num_str, 1e-15)
    } else if let Some(num_str) = value.strip_suffix("ps") {
        (num_str, 1e-12)
    } else if let Some(num_str) = value.strip_suffix("ns") {
        (num_str, 1e-9)
    } else if let Some(num_str) = value.strip_suffix("us") {
        (num_str, 1e-6)
    } else if let Some(num_str) = value.strip_suffix("ms") {
        (num_str, 1e-3)
    } else if let Some(num_str) = value.strip_suffix('s') {
        (num_str, 1.0)
    } else {
        // bare numbers are seconds
        (value.as_str(), 1.0)
    };

    let number: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("Invalid time value '{}'", value))?;
    Ok(number * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_time_value() {
        assert_eq!(parse_time_value("1ns").unwrap(), 1e-9);
        assert_eq!(parse_time_value("1.5us").unwrap(), 1.5e-6);
        assert_eq!(parse_time_value("16ms").unwrap(), 16e-3);
        assert_eq!(parse_time_value("2s").unwrap(), 2.0);
        assert_eq!(parse_time_value("0.25").unwrap(), 0.25);
        assert_eq!(parse_time_value(" 10MS ").unwrap(), 10e-3);
    }

    #[test]
    fn test_parse_time_value_rejects_garbage() {
        assert!(parse_time_value("fast").is_err());
        assert!(parse_time_value("ms").is_err());
    }

    #[test]
    fn test_load_scenario() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "title": "rc",
                "circuit": {{ "elements": [
                    {{ "id": 0, "node0": 0, "node1": 1, "type": "battery", "voltage": 5.0 }},
                    {{ "id": 1, "node0": 1, "node1": 2, "type": "resistor", "resistance": 10.0 }},
                    {{ "id": 2, "node0": 2, "node1": 0, "type": "capacitor", "capacitance": 0.01 }}
                ] }},
                "config": {{ "integrator": {{ "min_dt": 1e-4 }} }}
            }}"#
        )
        .unwrap();

        let scenario = Scenario::load(file.path()).unwrap();

        assert_eq!(scenario.title, "rc");
        assert_eq!(scenario.circuit.elements.len(), 3);
        assert_eq!(scenario.config.integrator.min_dt, 1e-4);
        assert_eq!(scenario.config.integrator.error_threshold, 1e-5);
    }

    #[test]
    fn test_load_scenario_rejects_invalid_circuit() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "circuit": {{ "elements": [
                {{ "id": 0, "node0": 0, "node1": 1, "type": "resistor", "resistance": -1.0 }}
            ] }} }}"#
        )
        .unwrap();

        assert!(Scenario::load(file.path()).is_err());
    }
}
