//! Typed schemas for the attendance day tables and the roster table.

use crate::{Record, RosterEntry, RowView, SchemaError};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clock format used in time cells.
pub const TIME_FORMAT: &str = "%H:%M";

// ============================================================================
// ATTENDANCE STATUS
// ============================================================================

/// Attendance state of one employee on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AttendanceStatus {
    #[default]
    Absent,
    Present,
    Left,
    Excused,
}

impl AttendanceStatus {
    /// Convert to the cell representation.
    pub fn as_cell(&self) -> &'static str {
        match self {
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Left => "left",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_cell())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "absent" => Ok(AttendanceStatus::Absent),
            "present" => Ok(AttendanceStatus::Present),
            "left" => Ok(AttendanceStatus::Left),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(format!("unknown attendance status '{}'", other)),
        }
    }
}

fn parse_time(row: &RowView<'_>, column: &str) -> Result<Option<NaiveTime>, SchemaError> {
    let raw = row.get(column);
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .map(Some)
        .map_err(|e| row.invalid(column, raw, e.to_string()))
}

fn format_time(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_flag(row: &RowView<'_>, column: &str) -> Result<bool, SchemaError> {
    let raw = row.get(column);
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "" | "false" | "no" | "0" => Ok(false),
        _ => Err(row.invalid(column, raw, "expected TRUE or FALSE")),
    }
}

// ============================================================================
// DAY TABLE RECORD
// ============================================================================

/// One employee's row in a day table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub employee_id: String,
    pub name: String,
    pub status: AttendanceStatus,
    pub arrived_at: Option<NaiveTime>,
    pub left_at: Option<NaiveTime>,
    pub note: String,
}

impl AttendanceRecord {
    /// The seed row for an employee at the start of a day.
    pub fn absent(employee: &EmployeeRecord) -> Self {
        Self {
            employee_id: employee.employee_id.clone(),
            name: employee.name.clone(),
            status: AttendanceStatus::Absent,
            arrived_at: None,
            left_at: None,
            note: String::new(),
        }
    }
}

impl Record for AttendanceRecord {
    const HEADERS: &'static [&'static str] =
        &["Employee ID", "Name", "Status", "Arrived", "Left", "Note"];
    const KEY_COLUMN: &'static str = "Employee ID";

    fn key(&self) -> &str {
        &self.employee_id
    }

    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
        Ok(Self {
            employee_id: row.text("Employee ID"),
            name: row.text("Name"),
            status: row.parse("Status")?,
            arrived_at: parse_time(row, "Arrived")?,
            left_at: parse_time(row, "Left")?,
            note: row.text("Note"),
        })
    }

    fn encode(&self) -> Vec<String> {
        vec![
            self.employee_id.clone(),
            self.name.clone(),
            self.status.as_cell().to_string(),
            format_time(self.arrived_at),
            format_time(self.left_at),
            self.note.clone(),
        ]
    }
}

// ============================================================================
// ROSTER RECORD
// ============================================================================

/// One employee in the roster table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_id: String,
    pub name: String,
    pub chat_handle: String,
    pub department: String,
    pub active: bool,
}

impl Record for EmployeeRecord {
    const HEADERS: &'static [&'static str] =
        &["Employee ID", "Name", "Chat Handle", "Department", "Active"];
    const KEY_COLUMN: &'static str = "Employee ID";

    fn key(&self) -> &str {
        &self.employee_id
    }

    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError> {
        Ok(Self {
            employee_id: row.text("Employee ID"),
            name: row.text("Name"),
            chat_handle: row.text("Chat Handle"),
            department: row.text("Department"),
            active: parse_flag(row, "Active")?,
        })
    }

    fn encode(&self) -> Vec<String> {
        vec![
            self.employee_id.clone(),
            self.name.clone(),
            self.chat_handle.clone(),
            self.department.clone(),
            if self.active { "TRUE" } else { "FALSE" }.to_string(),
        ]
    }
}

impl RosterEntry for EmployeeRecord {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
