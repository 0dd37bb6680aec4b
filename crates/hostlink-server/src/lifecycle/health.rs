//! Liveness self-check used by `initialize` to tell a healthy control plane
//! from one whose pieces died underneath it.

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Listener answers and the executor is running.
    Healthy { port: u16 },
    /// Nothing has been started (or everything was shut down).
    Uninitialized,
    /// Something was started but at least one part is dead.
    Inconsistent {
        listener_alive: bool,
        executor_alive: bool,
    },
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Combine the observed parts of a started control plane.
///
/// The listener only counts as alive when its accept task is running *and*
/// a connect to `port` succeeds; `probe` is only called when the task is up.
pub fn evaluate(
    port: u16,
    accept_task_alive: bool,
    executor_alive: bool,
    probe: impl FnOnce(u16) -> bool,
) -> Health {
    let listener_alive = accept_task_alive && probe(port);
    if listener_alive && executor_alive {
        Health::Healthy { port }
    } else {
        Health::Inconsistent {
            listener_alive,
            executor_alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_parts_alive_is_healthy() {
        assert_eq!(evaluate(6400, true, true, |_| true), Health::Healthy { port: 6400 });
    }

    #[test]
    fn test_failed_probe_is_inconsistent() {
        assert_eq!(
            evaluate(6400, true, true, |_| false),
            Health::Inconsistent {
                listener_alive: false,
                executor_alive: true
            }
        );
    }

    #[test]
    fn test_dead_accept_task_skips_probe() {
        let health = evaluate(6400, false, true, |_| panic!("probe must not run"));
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_dead_executor_is_inconsistent() {
        assert_eq!(
            evaluate(6400, true, false, |_| true),
            Health::Inconsistent {
                listener_alive: true,
                executor_alive: false
            }
        );
    }
}
