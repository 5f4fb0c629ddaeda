use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, CONN_DESCRIPTOR_FILENAME, DATA_DIR_ENV};

/// Returns the user's home directory, or the current directory when `HOME` is unset.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory, or the current directory when `USERPROFILE` is unset.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory holding per-build state.
///
/// `RANGEFORGE_DATA_DIR` wins, then the platform data directory.
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(DATA_DIR_ENV)
    && !dir.is_empty()
  {
    return PathBuf::from(dir);
  }
  default_data_dir()
}

#[cfg(windows)]
fn default_data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

#[cfg(not(windows))]
fn default_data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Turn an object path into a single directory name: `/envs/prod/build` → `envs-prod-build`.
pub fn slug(id: &str) -> String {
  id.trim_matches('/')
    .split('/')
    .filter(|part| !part.is_empty())
    .map(|part| {
      part
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '-' })
        .collect::<String>()
    })
    .collect::<Vec<_>>()
    .join("-")
}

/// `{data_dir}/builds/{slug}`
pub fn build_dir(data_dir: &Path, build_id: &str) -> PathBuf {
  data_dir.join("builds").join(slug(build_id))
}

/// Working directory of a team: `{build_dir}/teams/{n}`.
pub fn team_dir(build_dir: &Path, team_number: u32) -> PathBuf {
  build_dir.join("teams").join(team_number.to_string())
}

/// Directory of an instance object below its build, mirroring the object path:
/// `{build_id}/teams/0/networks/corp/hosts/web` → `{build_dir}/teams/0/networks/corp/hosts/web`.
pub fn object_dir(build_dir: &Path, build_id: &str, id: &str) -> PathBuf {
  let relative = id.strip_prefix(build_id).unwrap_or(id).trim_matches('/');
  relative
    .split('/')
    .filter(|part| !part.is_empty() && *part != "..")
    .fold(build_dir.to_path_buf(), |dir, part| dir.join(part))
}

/// Where a builder leaves the connection descriptor of a provisioned host.
pub fn conn_descriptor_path(build_dir: &Path, build_id: &str, provisioned_host_id: &str) -> PathBuf {
  object_dir(build_dir, build_id, provisioned_host_id).join(CONN_DESCRIPTOR_FILENAME)
}
