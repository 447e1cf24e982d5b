use std::collections::HashSet;

use crate::core::particle::ParticleId;
use crate::error::{Error, Result};

/// Pair interaction law. Contact geometry is additive: two particles touch
/// when their separation equals the sum of their radii; a square well's
/// outer range is `lambda` times that contact distance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interaction {
    /// Impulsive core collision. `restitution` in [0, 1] scales the
    /// post-collision normal relative speed (1.0 = elastic).
    HardSphere { restitution: f64 },
    /// Hard core plus an attractive square well of depth `depth` extending
    /// to `lambda` (> 1) times the contact distance. The core bounce is
    /// elastic; crossing the outer range steps the pair's kinetic energy by
    /// `depth`.
    SquareWell { lambda: f64, depth: f64 },
    /// The pair never interacts.
    Inert,
}

impl Interaction {
    /// Elastic hard spheres, the default law.
    pub fn elastic() -> Self {
        Interaction::HardSphere { restitution: 1.0 }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Interaction::HardSphere { restitution } => {
                if !restitution.is_finite() || !(0.0..=1.0).contains(&restitution) {
                    return Err(Error::InvalidParam(
                        "restitution must be finite and within [0, 1]".into(),
                    ));
                }
            }
            Interaction::SquareWell { lambda, depth } => {
                if !lambda.is_finite() || lambda <= 1.0 {
                    return Err(Error::InvalidParam(
                        "square-well lambda must be finite and > 1".into(),
                    ));
                }
                if !depth.is_finite() || depth <= 0.0 {
                    return Err(Error::InvalidParam(
                        "square-well depth must be finite and > 0".into(),
                    ));
                }
            }
            Interaction::Inert => {}
        }
        Ok(())
    }

    /// Range multiplier applied to the contact distance: `lambda` for a
    /// square well, 1 otherwise.
    #[inline]
    pub(crate) fn range_factor(&self) -> f64 {
        match *self {
            Interaction::SquareWell { lambda, .. } => lambda,
            _ => 1.0,
        }
    }
}

/// A named, read-only grouping of particles (e.g., a chain). Used only to
/// scope interactions to particle subsets; the core never mutates it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Topology {
    name: String,
    members: HashSet<ParticleId>,
}

impl Topology {
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = ParticleId>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().collect(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: ParticleId) -> bool {
        self.members.contains(&id)
    }
}

/// A topology-scoped override of the default interaction: applies to a pair
/// when both participants belong to the topology.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InteractionRule {
    pub topology: Topology,
    pub interaction: Interaction,
}

/// Resolves which interaction law governs a given pair: the first rule whose
/// topology contains both particles wins, otherwise the default applies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InteractionMap {
    default: Interaction,
    rules: Vec<InteractionRule>,
}

impl InteractionMap {
    /// One law for every pair.
    pub fn uniform(default: Interaction) -> Self {
        Self {
            default,
            rules: Vec::new(),
        }
    }

    /// Add a scoped override; rules are consulted in insertion order.
    pub fn with_rule(mut self, topology: Topology, interaction: Interaction) -> Self {
        self.rules.push(InteractionRule {
            topology,
            interaction,
        });
        self
    }

    #[inline]
    pub fn default_interaction(&self) -> &Interaction {
        &self.default
    }

    #[inline]
    pub fn rules(&self) -> &[InteractionRule] {
        &self.rules
    }

    /// The law governing the pair (a, b).
    pub fn interaction_for(&self, a: ParticleId, b: ParticleId) -> &Interaction {
        for rule in &self.rules {
            if rule.topology.contains(a) && rule.topology.contains(b) {
                return &rule.interaction;
            }
        }
        &self.default
    }

    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for rule in &self.rules {
            rule.interaction.validate()?;
        }
        Ok(())
    }

    /// Largest range multiplier any rule can apply, for load-time checks
    /// against the periodic minimum-image limit.
    pub(crate) fn max_range_factor(&self) -> f64 {
        self.rules
            .iter()
            .map(|r| r.interaction.range_factor())
            .fold(self.default.range_factor(), f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(Interaction::HardSphere { restitution: 1.2 }.validate().is_err());
        assert!(Interaction::SquareWell {
            lambda: 0.9,
            depth: 1.0
        }
        .validate()
        .is_err());
        assert!(Interaction::SquareWell {
            lambda: 1.5,
            depth: -1.0
        }
        .validate()
        .is_err());
        assert!(Interaction::elastic().validate().is_ok());
    }

    #[test]
    fn scoped_rule_applies_only_inside_topology() {
        let chain = Topology::new("chain-a", [0, 1, 2]);
        let map = InteractionMap::uniform(Interaction::elastic()).with_rule(
            chain,
            Interaction::SquareWell {
                lambda: 1.5,
                depth: 0.25,
            },
        );
        assert!(matches!(
            map.interaction_for(0, 2),
            Interaction::SquareWell { .. }
        ));
        assert!(matches!(
            map.interaction_for(0, 3),
            Interaction::HardSphere { .. }
        ));
        assert!(matches!(
            map.interaction_for(4, 5),
            Interaction::HardSphere { .. }
        ));
    }

    #[test]
    fn first_matching_rule_wins() {
        let a = Topology::new("a", [0, 1]);
        let b = Topology::new("b", [0, 1, 2]);
        let map = InteractionMap::uniform(Interaction::elastic())
            .with_rule(a, Interaction::Inert)
            .with_rule(
                b,
                Interaction::SquareWell {
                    lambda: 2.0,
                    depth: 1.0,
                },
            );
        assert!(matches!(map.interaction_for(0, 1), Interaction::Inert));
        assert!(matches!(
            map.interaction_for(1, 2),
            Interaction::SquareWell { .. }
        ));
    }

    #[test]
    fn max_range_factor_covers_rules() {
        let map = InteractionMap::uniform(Interaction::elastic()).with_rule(
            Topology::new("w", [0, 1]),
            Interaction::SquareWell {
                lambda: 1.8,
                depth: 0.5,
            },
        );
        assert_eq!(map.max_range_factor(), 1.8);
    }
}
