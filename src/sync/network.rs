use std::sync::atomic::{AtomicBool, Ordering};

/// Result of reporting a connectivity observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Transition {
    WentOnline,
    WentOffline,
    Unchanged,
}

/// Shared belief about whether the remote store is reachable. Starts from a
/// caller-supplied guess and is updated from request outcomes and probes.
#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) -> Transition {
        let previous = self.online.swap(online, Ordering::AcqRel);
        match (previous, online) {
            (false, true) => {
                tracing::info!("connectivity restored");
                Transition::WentOnline
            }
            (true, false) => {
                tracing::warn!("remote unreachable, switching to offline mode");
                Transition::WentOffline
            }
            _ => Transition::Unchanged,
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_transitions_only_on_change() {
        let connectivity = Connectivity::new(false);
        assert_eq!(connectivity.set_online(false), Transition::Unchanged);
        assert_eq!(connectivity.set_online(true), Transition::WentOnline);
        assert!(connectivity.is_online());
        assert_eq!(connectivity.set_online(true), Transition::Unchanged);
        assert_eq!(connectivity.set_online(false), Transition::WentOffline);
        assert!(!connectivity.is_online());
    }
}
