use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::Result;
use csv::Writer;
use log::info;
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::cli::OutputFormat;
use crate::results::{CircuitState, ResultSet};

/// Per-step readouts of a scenario run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub title: String,
    /// Simulated time at the end of each outer step
    pub time_points: Vec<f64>,
    /// Sub-steps the integrator took for each outer step
    pub sub_steps: Vec<usize>,
    pub node_voltages: BTreeMap<String, Vec<f64>>,
    pub currents: BTreeMap<String, Vec<f64>>,
    pub average_currents: BTreeMap<String, Vec<f64>>,
}

impl Trace {
    pub fn new(title: impl Into<String>) -> Self {
        Trace {
            title: title.into(),
            ..Trace::default()
        }
    }

    /// Append the readouts of one outer step ending at `time`
    pub fn record(&mut self, time: f64, circuit: &Circuit, results: &ResultSet<CircuitState>) {
        self.time_points.push(time);
        self.sub_steps.push(results.len());

        for node in circuit.nodes() {
            self.node_voltages
                .entry(node.to_string())
                .or_default()
                .push(results.node_voltage(node));
        }
        for element in &circuit.elements {
            let key = element.id.to_string();
            self.currents
                .entry(key.clone())
                .or_default()
                .push(results.instantaneous_current(element.id));
            self.average_currents
                .entry(key)
                .or_default()
                .push(results.time_average_current(element.id));
        }
    }

    pub fn len(&self) -> usize {
        self.time_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_points.is_empty()
    }

    pub fn export(&self, path: impl AsRef<Path>, format: OutputFormat) -> Result<()> {
        match format {
            OutputFormat::Csv => self.export_csv(path.as_ref()),
            OutputFormat::Json => self.export_json(path.as_ref()),
        }
    }

    /// One row per outer step: time, sub-steps, V(node)..., I(element)..., Iavg(element)...
    fn export_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = Writer::from_writer(file);

        let mut header = vec!["time".to_string(), "sub_steps".to_string()];
        header.extend(self.node_voltages.keys().map(|node| format!("V({})", node)));
        header.extend(self.currents.keys().map(|element| format!("I({})", element)));
        header.extend(self.average_currents.keys().map(|element| format!("Iavg({})", element)));
        writer.write_record(&header)?;

        let column = |values: &Vec<f64>, i: usize| values.get(i).copied().unwrap_or(0.0).to_string();
        for (i, &time) in self.time_points.iter().enumerate() {
            let mut record = vec![time.to_string(), self.sub_steps[i].to_string()];
            record.extend(self.node_voltages.values().map(|v| column(v, i)));
            record.extend(self.currents.values().map(|v| column(v, i)));
            record.extend(self.average_currents.values().map(|v| column(v, i)));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        info!("Trace exported to CSV: {}", path.display());
        Ok(())
    }

    fn export_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Trace exported to JSON: {}", path.display());
        Ok(())
    }

    pub fn print_summary(&self) {
        println!("\n=== {} ===", self.title);
        println!("Outer steps: {}", self.len());
        if let Some(&time) = self.time_points.last() {
            println!("Simulated time: {:.3}ms", time * 1000.0);
        }
        let sub_steps: usize = self.sub_steps.iter().sum();
        println!("Total sub-steps: {}", sub_steps);

        if !self.node_voltages.is_empty() {
            println!("\nNode voltages (final values):");
            for (node, voltages) in &self.node_voltages {
                if let Some(&v) = voltages.last() {
                    println!("  V({}): {:.6}V", node, v);
                }
            }
        }

        if !self.currents.is_empty() {
            println!("\nElement currents (final / step average):");
            for (element, currents) in &self.currents {
                let average = self.average_currents.get(element).and_then(|a| a.last());
                if let (Some(&i), Some(&avg)) = (currents.last(), average) {
                    println!("  I({}): {:.6}A / {:.6}A", element, i, avg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{ElementKind, NodeId};
    use crate::simulator::Simulator;
    use tempfile::tempdir;

    fn divider_trace(steps: usize) -> Trace {
        let mut circuit = Circuit::new();
        circuit.add(NodeId(0), NodeId(1), ElementKind::Battery { voltage: 6.0, internal_resistance: 0.0 });
        circuit.add(NodeId(1), NodeId(2), ElementKind::Resistor { resistance: 1.0 });
        circuit.add(NodeId(2), NodeId(0), ElementKind::Resistor { resistance: 2.0 });

        let mut simulator = Simulator::new(circuit);
        let mut trace = Trace::new("divider");
        for _ in 0..steps {
            let results = simulator.step(0.016);
            trace.record(simulator.time(), simulator.circuit(), &results);
        }
        trace
    }

    #[test]
    fn test_record_steps() {
        let trace = divider_trace(3);

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.sub_steps, vec![1, 1, 1]);
        assert_eq!(trace.node_voltages.len(), 3);
        assert_eq!(trace.currents["e1"].len(), 3);
        assert!((trace.node_voltages["n2"][2] - 4.0).abs() < 1e-3);
        assert!((trace.average_currents["e0"][0] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        divider_trace(2).export(&path, OutputFormat::Csv).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(&header[0], "time");
        assert_eq!(&header[1], "sub_steps");
        assert!(header.iter().any(|h| h == "V(n1)"));
        assert!(header.iter().any(|h| h == "Iavg(e2)"));
        assert_eq!(reader.records().count(), 2);
    }

    #[test]
    fn test_export_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let trace = divider_trace(2);
        trace.export(&path, OutputFormat::Json).unwrap();

        let loaded: Trace = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(loaded.title, "divider");
        assert_eq!(loaded.time_points, trace.time_points);
        assert_eq!(loaded.currents, trace.currents);
    }
}
