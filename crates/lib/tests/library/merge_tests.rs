//! Layer folding through the file reader.

use rangeforge_lib::load::{LoadError, load_layers};
use rangeforge_lib::merge::MergeError;
use rangeforge_lib::util::hash::Hashable;
use tempfile::TempDir;

use super::common::write_file;

fn host_layer(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
  write_file(dir.path(), name, &format!(r#"{{"hosts":[{body}]}}"#))
}

#[test]
fn later_layer_wins_by_default() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","hostname":"a","os":"ubuntu"}"#);
  let b = host_layer(&temp, "b.json", r#"{"id":"web","hostname":"b"}"#);

  let layer = load_layers(&[a, b]).unwrap();
  let web = &layer.hosts["web"];
  assert_eq!(web.hostname, "b");
  assert_eq!(web.os, "ubuntu");
  assert_eq!(web.provenance.sources().len(), 2);
  assert!(web.provenance.current_file().ends_with("b.json"));
}

#[test]
fn skip_keeps_the_base() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","hostname":"a"}"#);
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","hostname":"b","on_conflict":{"do":"skip"}}"#,
  );

  let layer = load_layers(&[a, b]).unwrap();
  assert_eq!(layer.hosts["web"].hostname, "a");
}

#[test]
fn merging_a_layer_twice_changes_nothing() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(
    &temp,
    "a.json",
    r#"{"id":"web","hostname":"a","exposed_tcp_ports":["22","80"],"vars":{"role":"web"}}"#,
  );

  let once = load_layers(std::slice::from_ref(&a)).unwrap();
  let twice = load_layers(&[a.clone(), a]).unwrap();
  assert_eq!(
    serde_json::to_value(&once.hosts["web"]).unwrap(),
    serde_json::to_value(&twice.hosts["web"]).unwrap()
  );
  assert_eq!(
    once.hosts["web"].checksum().unwrap(),
    twice.hosts["web"].checksum().unwrap()
  );
}

#[test]
fn overwrite_replaces_every_field() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(
    &temp,
    "a.json",
    r#"{"id":"web","hostname":"a","os":"ubuntu","on_conflict":{"do":"skip"}}"#,
  );
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","hostname":"b","on_conflict":{"do":"overwrite"}}"#,
  );

  let layer = load_layers(&[a, b]).unwrap();
  let web = &layer.hosts["web"];
  assert_eq!(web.hostname, "b");
  assert_eq!(web.os, "");
  let policy = web.on_conflict.as_ref().map(|p| p.strategy.as_str());
  assert_eq!(policy, Some("skip"));
}

#[test]
fn inherit_lets_the_base_win() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","hostname":"a"}"#);
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","hostname":"b","os":"kali","on_conflict":{"do":"inherit"}}"#,
  );

  let layer = load_layers(&[a, b]).unwrap();
  let web = &layer.hosts["web"];
  assert_eq!(web.hostname, "a");
  assert_eq!(web.os, "kali");
}

#[test]
fn append_concatenates_lists() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","exposed_tcp_ports":["22"]}"#);
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","exposed_tcp_ports":["80"],"on_conflict":{"do":"default","append":true}}"#,
  );

  let layer = load_layers(&[a, b]).unwrap();
  assert_eq!(layer.hosts["web"].exposed_tcp_ports, vec!["22", "80"]);
}

#[test]
fn panic_names_both_sources() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","hostname":"a"}"#);
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","hostname":"b","on_conflict":{"do":"panic"}}"#,
  );

  match load_layers(&[a, b]) {
    Err(LoadError::Merge {
      source: MergeError::Conflict { base_file, layer_file, .. },
      ..
    }) => {
      assert!(base_file.ends_with("a.json"));
      assert!(layer_file.ends_with("b.json"));
    }
    other => panic!("expected a merge conflict, got {other:?}"),
  }
}

#[test]
fn unknown_strategy_is_rejected() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"web","hostname":"a"}"#);
  let b = host_layer(
    &temp,
    "b.json",
    r#"{"id":"web","hostname":"b","on_conflict":{"do":"clobber"}}"#,
  );

  let err = load_layers(&[a, b]).unwrap_err();
  assert!(err.to_string().contains("invalid conflict strategy"));
}

#[test]
fn misspelled_key_fails_the_load() {
  let temp = TempDir::new().unwrap();
  let a = host_layer(&temp, "a.json", r#"{"id":"db","instnace_size":"xlarge"}"#);

  match load_layers(&[a]) {
    Err(LoadError::Parse { source, .. }) => assert!(source.to_string().contains("instnace_size")),
    other => panic!("expected a parse error, got {other:?}"),
  }
}

#[test]
fn validation_errors_are_reported_together() {
  let temp = TempDir::new().unwrap();
  write_file(temp.path(), "motd.txt", "welcome\n");
  let bad = write_file(
    temp.path(),
    "bad.json",
    r#"{
      "networks": [{ "id": "corp", "cidr": "not-a-cidr" }],
      "commands": [{ "id": "reboot" }],
      "remote_files": [{ "id": "motd", "source": "motd.txt", "destination": "/etc/motd", "perms": "0o9" }]
    }"#,
  );

  match load_layers(&[bad]) {
    Err(LoadError::Invalid { count, details }) => {
      assert_eq!(count, 3);
      assert!(details.contains("cidr"));
      assert!(details.contains("program"));
      assert!(details.contains("not an octal mode"));
    }
    other => panic!("expected validation errors, got {other:?}"),
  }
}
