//! CSV intake for offline scoring runs.
//!
//! Reads lead and agent exports in the platform's CSV layout so rankings can
//! be computed without a running service. Structural problems surface as CSV
//! errors; impossible values surface as row errors with their line number.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Deserializer};

use crate::routing::{Agent, AgentId, Lead, LeadId, LeadStatus, Location};

#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    Csv(csv::Error),
    Row { line: u64, message: String },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Io(err) => write!(f, "could not read input: {err}"),
            IngestError::Csv(err) => write!(f, "could not parse csv: {err}"),
            IngestError::Row { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Io(err) => Some(err),
            IngestError::Csv(err) => Some(err),
            IngestError::Row { .. } => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for IngestError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

pub fn read_leads_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Lead>, IngestError> {
    read_leads(File::open(path)?)
}

pub fn read_leads<R: Read>(reader: R) -> Result<Vec<Lead>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut leads = Vec::new();

    for (index, record) in csv_reader.deserialize::<LeadRow>().enumerate() {
        let line = data_line(index);
        let row = record?;
        leads.push(row.into_lead(line)?);
    }

    Ok(leads)
}

pub fn read_agents_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Agent>, IngestError> {
    read_agents(File::open(path)?)
}

pub fn read_agents<R: Read>(reader: R) -> Result<Vec<Agent>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut agents = Vec::new();

    for (index, record) in csv_reader.deserialize::<AgentRow>().enumerate() {
        let line = data_line(index);
        let row = record?;
        agents.push(row.into_agent(line)?);
    }

    Ok(agents)
}

// Data rows start on line 2, after the header.
fn data_line(index: usize) -> u64 {
    index as u64 + 2
}

#[derive(Debug, Deserialize)]
struct LeadRow {
    #[serde(rename = "Lead ID")]
    id: String,
    #[serde(
        rename = "Insurance Type",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    insurance_type: Option<String>,
    #[serde(rename = "State", default, deserialize_with = "empty_string_as_none")]
    state: Option<String>,
    #[serde(rename = "City", default, deserialize_with = "empty_string_as_none")]
    city: Option<String>,
    #[serde(
        rename = "Quality Score",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    quality_score: Option<String>,
    #[serde(rename = "Status", default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
}

impl LeadRow {
    fn into_lead(self, line: u64) -> Result<Lead, IngestError> {
        let quality_score = match self.quality_score.as_deref() {
            Some(raw) => {
                let score = parse_number(line, "Quality Score", raw)?;
                if !(0.0..=100.0).contains(&score) {
                    return Err(IngestError::Row {
                        line,
                        message: format!("Quality Score {score} is outside 0..=100"),
                    });
                }
                Some(score)
            }
            None => None,
        };
        let status = match self.status.as_deref() {
            Some(raw) => LeadStatus::from_label(raw).ok_or_else(|| IngestError::Row {
                line,
                message: format!("unknown lead status '{raw}'"),
            })?,
            None => LeadStatus::Qualified,
        };

        Ok(Lead {
            id: LeadId(self.id),
            insurance_type: self.insurance_type,
            location: Location {
                state: self.state,
                city: self.city,
            },
            quality_score,
            status,
            updated_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AgentRow {
    #[serde(rename = "Agent ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(
        rename = "Specializations",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    specializations: Option<String>,
    #[serde(rename = "State", default, deserialize_with = "empty_string_as_none")]
    state: Option<String>,
    #[serde(rename = "City", default, deserialize_with = "empty_string_as_none")]
    city: Option<String>,
    #[serde(rename = "Active", default, deserialize_with = "empty_string_as_none")]
    active: Option<String>,
    #[serde(rename = "Rating")]
    rating: String,
    #[serde(rename = "Conversion Rate")]
    conversion_rate: String,
    #[serde(rename = "Open Leads")]
    open_leads: String,
    #[serde(rename = "Max Capacity")]
    max_capacity: String,
}

impl AgentRow {
    fn into_agent(self, line: u64) -> Result<Agent, IngestError> {
        let rating = parse_number(line, "Rating", &self.rating)?;
        if !(0.0..=5.0).contains(&rating) {
            return Err(IngestError::Row {
                line,
                message: format!("Rating {rating} is outside 0..=5"),
            });
        }
        let conversion_rate = parse_number(line, "Conversion Rate", &self.conversion_rate)?;
        if !(0.0..=1.0).contains(&conversion_rate) {
            return Err(IngestError::Row {
                line,
                message: format!("Conversion Rate {conversion_rate} is outside 0..=1"),
            });
        }
        let current_lead_count = parse_count(line, "Open Leads", &self.open_leads)?;
        let max_lead_capacity = parse_count(line, "Max Capacity", &self.max_capacity)?;
        let is_active = match self.active.as_deref() {
            Some(raw) => parse_flag(line, "Active", raw)?,
            None => true,
        };
        let specializations = self
            .specializations
            .as_deref()
            .map(|raw| {
                raw.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Agent {
            id: AgentId(self.id),
            name: self.name,
            specializations,
            location: Location {
                state: self.state,
                city: self.city,
            },
            is_active,
            rating,
            conversion_rate,
            current_lead_count,
            max_lead_capacity,
        })
    }
}

fn parse_number(line: u64, field: &str, raw: &str) -> Result<f64, IngestError> {
    raw.trim().parse::<f64>().map_err(|_| IngestError::Row {
        line,
        message: format!("{field} '{raw}' is not a number"),
    })
}

fn parse_count(line: u64, field: &str, raw: &str) -> Result<u32, IngestError> {
    raw.trim().parse::<u32>().map_err(|_| IngestError::Row {
        line,
        message: format!("{field} '{raw}' is not a whole number"),
    })
}

fn parse_flag(line: u64, field: &str, raw: &str) -> Result<bool, IngestError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        other => Err(IngestError::Row {
            line,
            message: format!("{field} '{other}' is not a yes/no value"),
        }),
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
