//! Source/receiver table parsing and event grouping.
//!
//! Input tables are typed records, not ragged numeric arrays: conversion
//! from whatever shape a caller's table has happens once, at the boundary,
//! rather than being threaded through the solvers.

use std::collections::BTreeMap;

use crate::error::{RaytraceError, Result};
use crate::geometry::Point3;
use crate::solver::Source;

/// One row of the input source table, already normalized from whichever of
/// the 3/4/5-column shapes the caller supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRow {
    pub event_id: Option<u64>,
    pub t0: f64,
    pub position: Point3,
}

impl SourceRow {
    /// 3-column shape: `(x, y, z)`, origin time implicitly `0`.
    pub fn from_xyz(p: [f64; 3]) -> Self {
        Self {
            event_id: None,
            t0: 0.0,
            position: Point3::new(p[0], p[1], p[2]),
        }
    }

    /// 4-column shape: `(t0, x, y, z)`.
    pub fn from_t0_xyz(row: [f64; 4]) -> Self {
        Self {
            event_id: None,
            t0: row[0],
            position: Point3::new(row[1], row[2], row[3]),
        }
    }

    /// 5-column shape: `(event_id, t0, x, y, z)`.
    pub fn from_event_t0_xyz(row: [f64; 5]) -> Self {
        Self {
            event_id: Some(row[0] as u64),
            t0: row[1],
            position: Point3::new(row[2], row[3], row[4]),
        }
    }
}

/// One receiver row: a position, optionally paired to a source event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverRow {
    pub event_id: Option<u64>,
    pub position: Point3,
}

impl ReceiverRow {
    pub fn from_xyz(p: [f64; 3]) -> Self {
        Self {
            event_id: None,
            position: Point3::new(p[0], p[1], p[2]),
        }
    }

    pub fn with_event(p: [f64; 3], event_id: u64) -> Self {
        Self {
            event_id: Some(event_id),
            position: Point3::new(p[0], p[1], p[2]),
        }
    }
}

/// An independent eikonal problem: a group of sources sharing an origin
/// (a "virtual source shape"), and the receivers whose traveltime/raypath
/// is wanted from it. `receiver_indices` point back into the caller's
/// original receiver array, so results can be written back in input order.
#[derive(Debug, Clone)]
pub struct Event {
    pub sources: Vec<Source>,
    pub receiver_indices: Vec<usize>,
}

/// Groups `sources` and `receivers` into independent events: rows sharing
/// an explicit event id form one event; failing that, `aggregate_src`
/// treats every source row as one compound source paired with every
/// receiver; otherwise each source row is its own event, paired 1:1 with
/// the receiver row at the same index.
///
/// Event-id grouping (when any source row carries one) takes priority over
/// `aggregate_src`, since an explicit event id already states the grouping
/// the caller wants.
pub fn group_events(
    sources: &[SourceRow],
    receivers: &[ReceiverRow],
    aggregate_src: bool,
) -> Result<Vec<Event>> {
    let has_event_ids = sources.iter().any(|s| s.event_id.is_some());

    if has_event_ids {
        return group_by_event_id(sources, receivers);
    }

    if aggregate_src {
        let compound: Vec<Source> = sources
            .iter()
            .map(|s| Source {
                t0: s.t0,
                position: s.position,
            })
            .collect();
        return Ok(vec![Event {
            sources: compound,
            receiver_indices: (0..receivers.len()).collect(),
        }]);
    }

    if sources.len() != receivers.len() {
        return Err(RaytraceError::WrongSize {
            expected: sources.len(),
            got: receivers.len(),
        });
    }

    Ok((0..sources.len())
        .map(|idx| Event {
            sources: vec![Source {
                t0: sources[idx].t0,
                position: sources[idx].position,
            }],
            receiver_indices: vec![idx],
        })
        .collect())
}

fn group_by_event_id(sources: &[SourceRow], receivers: &[ReceiverRow]) -> Result<Vec<Event>> {
    let mut by_id: BTreeMap<u64, Event> = BTreeMap::new();

    for s in sources {
        let id = s.event_id.ok_or(RaytraceError::WrongSize {
            expected: sources.len(),
            got: receivers.len(),
        })?;
        let ev = by_id.entry(id).or_insert_with(|| Event {
            sources: Vec::new(),
            receiver_indices: Vec::new(),
        });
        ev.sources.push(Source {
            t0: s.t0,
            position: s.position,
        });
    }

    for (idx, r) in receivers.iter().enumerate() {
        let id = r.event_id.ok_or(RaytraceError::WrongSize {
            expected: sources.len(),
            got: receivers.len(),
        })?;
        let ev = by_id.get_mut(&id).ok_or(RaytraceError::WrongSize {
            expected: sources.len(),
            got: receivers.len(),
        })?;
        ev.receiver_indices.push(idx);
    }

    Ok(by_id.into_values().collect())
}
