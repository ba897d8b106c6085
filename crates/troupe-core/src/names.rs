// ABOUTME: Display-name pool for new sessions.
// ABOUTME: Picks a display name unused by any session in the workspace, archived ones included.

use crate::persona::Persona;
use rand::seq::SliceRandom;
use std::collections::HashSet;

pub const NAME_POOL: &[&str] = &[
    "Ada", "Alan", "Barbara", "Bjarne", "Claude", "Dennis", "Donald", "Edsger", "Frances",
    "Grace", "Guido", "Hedy", "Ivan", "Jean", "John", "Ken", "Leslie", "Linus", "Margaret",
    "Niklaus", "Radia", "Rich", "Robin", "Shafi", "Sophie", "Tim", "Tony", "Vint", "Whitfield",
    "Yukihiro",
];

fn name_slug(name: &str) -> String {
    let slug: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

/// Session id for a persona and display name, e.g. `software-engineer-grace`.
pub fn session_id(persona: Persona, name: &str) -> String {
    format!("{}-{}", persona.slug(), name_slug(name))
}

/// Name part of every stem that starts with a persona slug.
fn names_in_use(taken: &HashSet<String>) -> HashSet<String> {
    taken
        .iter()
        .filter_map(|stem| {
            Persona::ALL.iter().find_map(|persona| {
                stem.strip_prefix(persona.slug())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .map(str::to_string)
            })
        })
        .collect()
}

/// Pick a (display name, session id) pair unused in the workspace.
///
/// `taken` holds every directory stem in the workspace, archived ones included, so neither
/// ids nor display names are ever reused across personas. Once the pool is exhausted,
/// names get a numeric suffix.
pub fn pick(persona: Persona, taken: &HashSet<String>) -> (String, String) {
    let in_use = names_in_use(taken);
    let free = |name: &str| {
        !in_use.contains(&name_slug(name)) && !taken.contains(&session_id(persona, name))
    };

    let mut pool: Vec<&str> = NAME_POOL.to_vec();
    pool.shuffle(&mut rand::thread_rng());

    if let Some(name) = pool.iter().find(|name| free(name)) {
        return (name.to_string(), session_id(persona, name));
    }

    let mut n = 2u32;
    loop {
        for name in &pool {
            let display = format!("{name} {n}");
            if free(&display) {
                let id = session_id(persona, &display);
                return (display, id);
            }
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_slugifies() {
        assert_eq!(session_id(Persona::Engineer, "Grace"), "software-engineer-grace");
        assert_eq!(session_id(Persona::Qa, "Ada 2"), "qa-engineer-ada-2");
    }

    #[test]
    fn test_pick_avoids_taken() {
        let taken: HashSet<String> = NAME_POOL
            .iter()
            .skip(1)
            .map(|n| session_id(Persona::Intern, n))
            .collect();
        let (name, id) = pick(Persona::Intern, &taken);
        assert_eq!(name, NAME_POOL[0]);
        assert!(!taken.contains(&id));
    }

    #[test]
    fn test_pick_suffixes_when_pool_exhausted() {
        let taken: HashSet<String> = NAME_POOL
            .iter()
            .map(|n| session_id(Persona::Architect, n))
            .collect();
        let (name, id) = pick(Persona::Architect, &taken);
        assert!(name.ends_with(" 2"));
        assert!(id.ends_with("-2"));
    }

    #[test]
    fn test_display_names_unique_across_personas() {
        let taken: HashSet<String> = NAME_POOL
            .iter()
            .map(|n| session_id(Persona::Architect, n))
            .collect();
        let (name, id) = pick(Persona::Manager, &taken);
        assert!(name.ends_with(" 2"));
        assert!(id.starts_with("manager-"));
        assert!(!NAME_POOL.contains(&name.as_str()));
    }

    #[test]
    fn test_archived_names_stay_reserved() {
        let mut taken: HashSet<String> = NAME_POOL
            .iter()
            .skip(1)
            .map(|n| session_id(Persona::Qa, n))
            .collect();
        taken.insert(session_id(Persona::Intern, NAME_POOL[0]));
        taken.insert("deliverables".to_string());
        let (name, _) = pick(Persona::Engineer, &taken);
        assert!(name.ends_with(" 2"));
    }
}
