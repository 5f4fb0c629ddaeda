//! Per-type validators.
//!
//! Validators only report; the caller decides whether a failure aborts the run.

use std::net::Ipv4Addr;

use thiserror::Error;

use super::object::Mergeable;
use super::types::{Command, DnsRecord, Environment, Host, Network, ProvisionerRef, RemoteFile, Script};

const DNS_RECORD_TYPES: &[&str] = &["A", "AAAA", "CNAME", "MX", "NS", "PTR", "SRV", "TXT"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path} ({file}): {message}")]
pub struct ValidationError {
  pub path: String,
  pub file: String,
  pub message: String,
}

impl ValidationError {
  fn new<T: Mergeable>(object: &T, message: impl Into<String>) -> Self {
    Self {
      path: object.path(),
      file: object.provenance().current_file(),
      message: message.into(),
    }
  }
}

fn require_id<T: Mergeable>(object: &T, errors: &mut Vec<ValidationError>) {
  if object.identity().is_empty() {
    errors.push(ValidationError::new(object, "id must not be empty"));
  }
}

/// Parse an IPv4 CIDR such as `10.0.1.0/24` into its network address and prefix length.
pub fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
  let (addr, prefix) = cidr.split_once('/')?;
  let addr: Ipv4Addr = addr.parse().ok()?;
  let prefix: u8 = prefix.parse().ok()?;
  (prefix <= 32).then_some((addr, prefix))
}

/// Parse an octal file mode such as `0644`, `644` or `0o644`.
pub fn parse_mode(perms: &str) -> Option<u32> {
  let digits = perms.strip_prefix("0o").unwrap_or(perms);
  if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
    return None;
  }
  u32::from_str_radix(digits, 8).ok()
}

pub fn validate_environment(env: &Environment) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(env, &mut errors);
  if env.team_count == 0 {
    errors.push(ValidationError::new(env, "team_count must be at least 1"));
  }
  for network in &env.networks {
    if network.name.is_empty() {
      errors.push(ValidationError::new(env, "included network without a name"));
    }
  }
  for cidr in &env.admin_cidrs {
    if parse_cidr(cidr).is_none() {
      errors.push(ValidationError::new(env, format!("admin cidr {cidr:?} does not parse")));
    }
  }
  errors
}

pub fn validate_host(host: &Host) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(host, &mut errors);
  if host.last_octet > 254 {
    errors.push(ValidationError::new(host, format!("last_octet {} is out of range", host.last_octet)));
  }
  for step in &host.provision_steps {
    if let Err(message) = step.parse::<ProvisionerRef>() {
      errors.push(ValidationError::new(host, message));
    }
  }
  for dep in &host.depends_on {
    if dep.host.is_empty() || dep.network.is_empty() {
      errors.push(ValidationError::new(host, "depends_on entries need both host and network"));
    }
  }
  errors
}

pub fn validate_network(network: &Network) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(network, &mut errors);
  if parse_cidr(&network.cidr).is_none() {
    errors.push(ValidationError::new(network, format!("cidr {:?} does not parse", network.cidr)));
  }
  errors
}

pub fn validate_script(script: &Script) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(script, &mut errors);
  if script.source.is_empty() {
    errors.push(ValidationError::new(script, "source must be declared"));
  }
  errors
}

pub fn validate_command(command: &Command) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(command, &mut errors);
  if command.program.is_empty() {
    errors.push(ValidationError::new(command, "program must be declared"));
  }
  errors
}

pub fn validate_remote_file(file: &RemoteFile) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(file, &mut errors);
  if file.source.is_empty() {
    errors.push(ValidationError::new(file, "source must be declared"));
  }
  if file.destination.is_empty() {
    errors.push(ValidationError::new(file, "destination must be declared"));
  }
  if !file.perms.is_empty() && parse_mode(&file.perms).is_none() {
    errors.push(ValidationError::new(
      file,
      format!("perms {:?} is not an octal mode", file.perms),
    ));
  }
  errors
}

pub fn validate_dns_record(record: &DnsRecord) -> Vec<ValidationError> {
  let mut errors = Vec::new();
  require_id(record, &mut errors);
  if record.name.is_empty() {
    errors.push(ValidationError::new(record, "name must be declared"));
  }
  if record.values.is_empty() {
    errors.push(ValidationError::new(record, "at least one value is required"));
  }
  let record_type = if record.record_type.is_empty() { "A" } else { record.record_type.as_str() };
  if !DNS_RECORD_TYPES.contains(&record_type) {
    errors.push(ValidationError::new(record, format!("unsupported record type {record_type:?}")));
  }
  errors
}
