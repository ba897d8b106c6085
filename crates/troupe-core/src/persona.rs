// ABOUTME: Persona (role) archetypes a session can play.
// ABOUTME: Maps directory slugs to personas and defines the dashboard hierarchy rank.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Manager,
    Architect,
    Engineer,
    Qa,
    Intern,
}

impl Persona {
    pub const ALL: [Persona; 5] = [
        Persona::Manager,
        Persona::Architect,
        Persona::Engineer,
        Persona::Qa,
        Persona::Intern,
    ];

    /// Canonical directory slug, used in session ids and request directory names.
    pub fn slug(&self) -> &'static str {
        match self {
            Persona::Manager => "project-manager",
            Persona::Architect => "architect",
            Persona::Engineer => "software-engineer",
            Persona::Qa => "qa-engineer",
            Persona::Intern => "intern",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Persona::Manager => &["project-manager", "product-manager", "manager"],
            Persona::Architect => &["architect", "software-architect"],
            Persona::Engineer => &["software-engineer", "engineer"],
            Persona::Qa => &["qa-engineer", "qa"],
            Persona::Intern => &["intern", "software-intern"],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Persona::Manager => "Manager",
            Persona::Architect => "Architect",
            Persona::Engineer => "Engineer",
            Persona::Qa => "QA",
            Persona::Intern => "Intern",
        }
    }

    /// Position in the team hierarchy; lower ranks sort first.
    pub fn rank(&self) -> u8 {
        match self {
            Persona::Manager => 0,
            Persona::Architect => 1,
            Persona::Engineer => 2,
            Persona::Qa => 3,
            Persona::Intern => 4,
        }
    }

    /// Resolve a slug or alias (case-insensitive).
    pub fn from_slug(slug: &str) -> Option<Persona> {
        let slug = slug.to_ascii_lowercase();
        Persona::ALL
            .into_iter()
            .find(|p| p.aliases().contains(&slug.as_str()))
    }

    /// Split a directory or session name into its persona prefix and the remainder.
    ///
    /// The longest matching alias wins so `qa-engineer-ada` is a QA session named `ada`
    /// rather than a `qa` session named `engineer-ada`.
    pub fn split_prefix(name: &str) -> Option<(Persona, &str)> {
        let mut best: Option<(Persona, usize)> = None;
        for persona in Persona::ALL {
            for alias in persona.aliases() {
                let matches = name.len() > alias.len() + 1
                    && name.starts_with(alias)
                    && name.as_bytes()[alias.len()] == b'-';
                if matches && best.map_or(true, |(_, len)| alias.len() > len) {
                    best = Some((persona, alias.len()));
                }
            }
        }
        best.map(|(persona, len)| (persona, &name[len + 1..]))
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Persona::from_slug(s).ok_or_else(|| format!("unknown persona: {s}"))
    }
}
