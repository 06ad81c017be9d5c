//! Default location of counters files.

use std::env;
use std::path::{Path, PathBuf};

use nix::unistd::{Uid, User};

/// Returns the directory counters files live in when addressed by name.
///
/// The `mcounters.dir` environment variable wins when set and nonempty.
/// Otherwise the base is `/dev/shm` on Linux when it exists, else the
/// platform temp directory, suffixed with `mcounters-<username>` (or
/// `mcounters-default` when the current user cannot be determined).
pub fn default_directory() -> PathBuf {
    if let Ok(dir) = env::var("mcounters.dir") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    let mut base = None;
    if cfg!(target_os = "linux") {
        let shm = Path::new("/dev/shm");
        if shm.exists() {
            base = Some(shm.to_path_buf());
        }
    }
    let base = base.unwrap_or_else(env::temp_dir);

    base.join(format!("mcounters-{}", current_username()))
}

fn current_username() -> String {
    match User::from_uid(Uid::effective()) {
        Ok(Some(user)) if !user.name.is_empty() => user.name,
        _ => String::from("default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_variable_overrides_discovery() {
        // One test mutates the process environment so nothing races it.
        env::set_var("mcounters.dir", "/somewhere/else");
        assert_eq!(default_directory(), PathBuf::from("/somewhere/else"));

        env::set_var("mcounters.dir", "");
        let discovered = default_directory();
        assert!(discovered
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("mcounters-"));

        env::remove_var("mcounters.dir");
    }
}
