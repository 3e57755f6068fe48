//! Plain-text run summaries for the terminal.

use std::fmt::Write as _;

use ferry_core::{migrate::MigrationReport, pipeline::Introspection};

// `fmt::Write` for `String` never fails, so the results below are ignored.

pub fn introspection(result: &Introspection) -> String {
  let stats = result.unifier.stats();
  let mut out = String::new();

  let _ = writeln!(out, "unified accounts: {}", result.unifier.len());
  let _ = writeln!(out, "  restored:          {}", stats.restored);
  let _ = writeln!(out, "  created:           {}", stats.created);
  let _ = writeln!(out, "  merged:            {}", stats.merged);
  let _ = writeln!(out, "  unverified:        {}", stats.unverified);
  let _ = writeln!(out, "  already processed: {}", stats.duplicates);
  let _ = writeln!(out, "  failed:            {}", result.failures.len());
  if !result.completed {
    let _ = writeln!(out, "interrupted; run again to continue from the last checkpoint");
  }

  let conflicts = result.unifier.conflicts();
  if !conflicts.is_empty() {
    let _ = writeln!(out, "\nconflicts ({}), not migrated:", conflicts.len());
    for conflict in conflicts {
      let _ = writeln!(out, "  {conflict}");
    }
  }

  if !result.collisions.is_empty() {
    let _ = writeln!(out, "\nconverted logins sharing a prefix ({}):", result.collisions.len());
    for collision in &result.collisions {
      let others: Vec<String> = collision
        .conflicts
        .iter()
        .map(|(id, login)| format!("id={id} login={login}"))
        .collect();
      let _ = writeln!(
        out,
        "  id={} login={} (was {}) collides with {}",
        collision.id,
        collision.login,
        collision.original_login,
        others.join(", ")
      );
    }
  }

  if !result.schema.conflicts.is_empty() {
    let _ = writeln!(out, "\nschema properties with mixed types:");
    for conflict in &result.schema.conflicts {
      let _ = writeln!(
        out,
        "  {}: {} -> {}",
        conflict.name,
        conflict.describe_counts(),
        conflict.chosen
      );
    }
  }

  for failure in &result.failures {
    let _ = writeln!(out, "failed account id={}: {}", failure.id, failure.error);
  }
  out
}

pub fn migration(report: &MigrationReport) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "migrated accounts: {}", report.written);
  let _ = writeln!(out, "  previously migrated: {}", report.skipped);
  let _ = writeln!(out, "  failed:              {}", report.failures.len());
  if report.cancelled {
    let _ = writeln!(out, "interrupted; run again to continue from the last checkpoint");
  }
  for failure in &report.failures {
    let _ = writeln!(out, "failed account id={}: {}", failure.id, failure.error);
  }
  out
}
