use tokio::sync::Mutex as AsyncMutex;

/// Serializes tests that touch process environment variables.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Sets environment variables for the lifetime of the guard and restores the
/// previous values on drop. Hold `ENV_LOCK` while one is alive.
pub struct ScopedEnv {
    saved: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    pub fn set(vars: &[(&str, Option<&str>)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
                (key.to_string(), previous)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
