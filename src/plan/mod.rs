//! Snapshot plans: the deterministic (route x viewport) worklist.
//!
//! Expansion order is part of the contract: routes in declared order on the
//! outside, viewports in configured order on the inside. Progress reports and
//! retry logs are keyed by this order.

pub mod naming;
pub mod types;

pub use naming::NamingPolicy;
pub use types::{CaptureUnit, Route, SnapshotIdentifier, Viewport};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Result type for plan construction
pub type PlanResult<T> = Result<T, PlanError>;

/// Configuration errors detected before any capture starts
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    /// A viewport with a zero dimension
    #[error("invalid viewport {width}x{height}: width and height must be non-zero")]
    InvalidViewport { width: u32, height: u32 },

    /// A route without a label cannot be named
    #[error("route #{index} (path '{path}') has an empty label")]
    EmptyRouteLabel { index: usize, path: String },

    /// Two or more units of the cross product share an identifier
    #[error("duplicate snapshot identifiers: {}", format_collisions(.0))]
    DuplicateIdentifiers(Vec<Collision>),
}

/// A group of units that would all produce the same identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collision {
    pub identifier: SnapshotIdentifier,
    pub units: Vec<CollidingUnit>,
}

/// One member of a collision group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollidingUnit {
    /// Position in the route x viewport cross product
    pub position: usize,
    pub route_label: String,
    pub route_path: String,
    pub viewport: Viewport,
}

impl fmt::Display for CollidingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) @ {}",
            self.position, self.route_label, self.route_path, self.viewport
        )
    }
}

fn format_collisions(collisions: &[Collision]) -> String {
    collisions
        .iter()
        .map(|c| {
            let units: Vec<String> = c.units.iter().map(|u| u.to_string()).collect();
            format!("'{}' <- [{}]", c.identifier, units.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// An ordered, collision-free list of capture units
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotPlan {
    units: Vec<CaptureUnit>,
}

impl SnapshotPlan {
    /// Expand routes x viewports into capture units
    ///
    /// Fails if any viewport is invalid, any route label is empty, or the
    /// cross product names two units identically. Every collision group is
    /// reported, not only the first.
    pub fn build(routes: &[Route], viewports: &[Viewport], naming: &NamingPolicy) -> PlanResult<Self> {
        if let Some(bad) = viewports.iter().find(|v| !v.is_valid()) {
            return Err(PlanError::InvalidViewport {
                width: bad.width,
                height: bad.height,
            });
        }
        if let Some((index, route)) = routes.iter().enumerate().find(|(_, r)| r.label.trim().is_empty()) {
            return Err(PlanError::EmptyRouteLabel {
                index,
                path: route.path.clone(),
            });
        }

        let mut units = Vec::with_capacity(routes.len() * viewports.len());
        for route in routes {
            for viewport in viewports {
                let identifier = naming.name_unit(route, viewport);
                units.push(CaptureUnit {
                    index: units.len(),
                    route: route.clone(),
                    viewport: viewport.clone(),
                    identifier,
                });
            }
        }

        let collisions = find_collisions(&units);
        if !collisions.is_empty() {
            return Err(PlanError::DuplicateIdentifiers(collisions));
        }

        debug!(routes = routes.len(), viewports = viewports.len(), units = units.len(), "built snapshot plan");
        Ok(Self { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaptureUnit> {
        self.units.iter()
    }

    /// Identifiers in plan order
    pub fn identifiers(&self) -> Vec<&SnapshotIdentifier> {
        self.units.iter().map(|u| &u.identifier).collect()
    }

    /// Keep only units whose route carries `tag`, preserving order
    pub fn with_tag(&self, tag: &str) -> SnapshotPlan {
        SnapshotPlan {
            units: self.units.iter().filter(|u| u.route.has_tag(tag)).cloned().collect(),
        }
    }

    /// Split the plan round-robin into `count` independent subsets
    ///
    /// Relative order is preserved inside every shard and units keep their
    /// position in the full plan. A `count` of zero is treated as one.
    pub fn shards(&self, count: usize) -> Vec<SnapshotPlan> {
        let count = count.max(1);
        let mut shards = vec![SnapshotPlan::default(); count];
        for (i, unit) in self.units.iter().enumerate() {
            shards[i % count].units.push(unit.clone());
        }
        shards
    }
}

impl<'a> IntoIterator for &'a SnapshotPlan {
    type Item = &'a CaptureUnit;
    type IntoIter = std::slice::Iter<'a, CaptureUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}

/// Group units by identifier, keeping groups of two or more in first-seen order
fn find_collisions(units: &[CaptureUnit]) -> Vec<Collision> {
    let mut groups: Vec<(SnapshotIdentifier, Vec<usize>)> = Vec::new();
    let mut seen: HashMap<&SnapshotIdentifier, usize> = HashMap::new();

    for (position, unit) in units.iter().enumerate() {
        match seen.get(&unit.identifier) {
            Some(&group) => groups[group].1.push(position),
            None => {
                seen.insert(&unit.identifier, groups.len());
                groups.push((unit.identifier.clone(), vec![position]));
            }
        }
    }

    groups
        .into_iter()
        .filter(|(_, positions)| positions.len() > 1)
        .map(|(identifier, positions)| Collision {
            identifier,
            units: positions
                .into_iter()
                .map(|position| {
                    let unit = &units[position];
                    CollidingUnit {
                        position,
                        route_label: unit.route.label.clone(),
                        route_path: unit.route.path.clone(),
                        viewport: unit.viewport.clone(),
                    }
                })
                .collect(),
        })
        .collect()
}
