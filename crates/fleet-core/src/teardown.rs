//! Best-effort removal of what `fleet provision` created.
//!
//! Resources are selected by a [`TeardownFilter`] (tag match OR name-prefix
//! match) evaluated against a fresh listing. Deletion is gated on an explicit
//! confirmation and never stops at the first failure. The same filter also
//! renders two standalone shell scripts for operators without this binary.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::cloud::CloudApi;
use crate::confirm::Confirmer;
use crate::error::{FleetError, Result};
use crate::io;
use crate::paths;
use crate::template::{Template, Vars};
use crate::types::{CloudResource, ResourceKind};

// ---------------------------------------------------------------------------
// TeardownFilter
// ---------------------------------------------------------------------------

static SELECTOR_RE: OnceLock<Regex> = OnceLock::new();

fn selector_re() -> &'static Regex {
    SELECTOR_RE.get_or_init(|| Regex::new(r"^[a-z][-a-z0-9]*$").unwrap())
}

/// Selects resources by network tag OR name prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownFilter {
    tag: Option<String>,
    prefix: Option<String>,
}

/// At least one of `tag` / `prefix` is required. Blank values count as absent.
pub fn build_filter(tag: Option<&str>, prefix: Option<&str>) -> Result<TeardownFilter> {
    let clean = |v: Option<&str>| -> Result<Option<String>> {
        match v.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) if s.len() <= paths::MAX_NAME_LEN && selector_re().is_match(s) => {
                Ok(Some(s.to_string()))
            }
            Some(s) => Err(FleetError::InvalidName(s.to_string())),
        }
    };
    let filter = TeardownFilter {
        tag: clean(tag)?,
        prefix: clean(prefix)?,
    };
    if filter.tag.is_none() && filter.prefix.is_none() {
        return Err(FleetError::InvalidConfig(
            "teardown needs a tag or a name prefix to select resources".into(),
        ));
    }
    Ok(filter)
}

impl TeardownFilter {
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn matches(&self, resource: &CloudResource) -> bool {
        let by_tag = self
            .tag
            .as_deref()
            .is_some_and(|t| resource.tags.iter().any(|rt| rt == t));
        let by_prefix = self
            .prefix
            .as_deref()
            .is_some_and(|p| resource.name.starts_with(p));
        by_tag || by_prefix
    }

    /// Equivalent `gcloud --filter` expression. `tag_field` differs between
    /// instances (`tags.items`) and firewall rules (`targetTags.list()`).
    pub fn gcloud_expr(&self, tag_field: &str) -> String {
        let mut terms = Vec::new();
        if let Some(t) = &self.tag {
            terms.push(format!("{tag_field}:{t}"));
        }
        if let Some(p) = &self.prefix {
            terms.push(format!("name~^{p}"));
        }
        terms.join(" OR ")
    }

    pub fn describe(&self) -> String {
        match (&self.tag, &self.prefix) {
            (Some(t), Some(p)) => format!("tag '{t}' or name prefix '{p}'"),
            (Some(t), None) => format!("tag '{t}'"),
            (None, Some(p)) => format!("name prefix '{p}'"),
            (None, None) => "nothing".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownScope {
    #[default]
    All,
    Instances,
    Rules,
}

impl TeardownScope {
    fn includes(self, kind: ResourceKind) -> bool {
        match self {
            TeardownScope::All => true,
            TeardownScope::Instances => kind == ResourceKind::ComputeInstance,
            TeardownScope::Rules => kind == ResourceKind::NetworkRule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub kind: ResourceKind,
    pub name: String,
    pub cause: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub matched: Vec<CloudResource>,
    pub confirmed: bool,
    pub deleted: Vec<String>,
    pub failed: Vec<DeletionFailure>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The error to exit with once the sweep is over, if anything failed.
    pub fn incomplete_error(&self) -> Option<FleetError> {
        if self.failed.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.failed.iter().map(|f| f.name.as_str()).collect();
        Some(FleetError::TeardownIncomplete {
            failed: self.failed.len(),
            names: names.join(", "),
        })
    }
}

/// List everything in scope and keep what the filter matches. Instances
/// come first so rules are removed only after the machines they serve.
pub fn select(
    cloud: &dyn CloudApi,
    filter: &TeardownFilter,
    scope: TeardownScope,
) -> Result<Vec<CloudResource>> {
    let mut found = Vec::new();
    if scope.includes(ResourceKind::ComputeInstance) {
        found.extend(cloud.list_instances()?);
    }
    if scope.includes(ResourceKind::NetworkRule) {
        found.extend(cloud.list_firewall_rules()?);
    }
    found.retain(|r| filter.matches(r));
    Ok(found)
}

/// Select and, if `confirmed`, delete every match.
pub fn apply(
    cloud: &dyn CloudApi,
    filter: &TeardownFilter,
    scope: TeardownScope,
    confirmed: bool,
) -> Result<TeardownReport> {
    let matched = select(cloud, filter, scope)?;
    Ok(delete_matched(cloud, matched, confirmed))
}

/// Select, show the matches to `confirmer`, then delete if approved.
/// Nothing to delete means no question is asked.
pub fn sweep(
    cloud: &dyn CloudApi,
    filter: &TeardownFilter,
    scope: TeardownScope,
    confirmer: &dyn Confirmer,
) -> Result<TeardownReport> {
    let matched = select(cloud, filter, scope)?;
    if matched.is_empty() {
        tracing::info!(filter = %filter.describe(), "nothing matches");
        return Ok(TeardownReport {
            confirmed: true,
            ..TeardownReport::default()
        });
    }
    let confirmed = confirmer.confirm(&summary(filter, &matched));
    Ok(delete_matched(cloud, matched, confirmed))
}

fn summary(filter: &TeardownFilter, matched: &[CloudResource]) -> String {
    let mut out = format!(
        "{} resource(s) match {} and will be deleted:\n",
        matched.len(),
        filter.describe()
    );
    for r in matched {
        out.push_str(&format!("  {:<17} {}\n", r.kind.as_str(), r.name));
    }
    out
}

fn delete_matched(
    cloud: &dyn CloudApi,
    matched: Vec<CloudResource>,
    confirmed: bool,
) -> TeardownReport {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();

    if !confirmed {
        tracing::info!(matched = matched.len(), "teardown not confirmed, nothing deleted");
    } else {
        for resource in &matched {
            let result = match resource.kind {
                ResourceKind::ComputeInstance => {
                    cloud.delete_instance(&resource.name, resource.zone.as_deref().unwrap_or(""))
                }
                ResourceKind::NetworkRule => cloud.delete_firewall_rule(&resource.name),
            };
            match result {
                Ok(()) => {
                    tracing::info!(kind = %resource.kind, name = %resource.name, "deleted");
                    deleted.push(resource.name.clone());
                }
                Err(e) => {
                    tracing::warn!(kind = %resource.kind, name = %resource.name, error = %e, "delete failed, continuing");
                    failed.push(DeletionFailure {
                        kind: resource.kind,
                        name: resource.name.clone(),
                        cause: e.to_string(),
                    });
                }
            }
        }
    }

    TeardownReport {
        matched,
        confirmed,
        deleted,
        failed,
    }
}

// ---------------------------------------------------------------------------
// Standalone scripts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownScripts {
    pub instances: String,
    pub firewall: String,
}

/// Single-quote `s` for bash.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn render_scripts(filter: &TeardownFilter, project: Option<&str>) -> Result<TeardownScripts> {
    let project_args = project
        .map(|p| shell_quote(&format!("--project={p}")))
        .unwrap_or_default();

    let instances = INSTANCES_SCRIPT.render(
        &Vars::new()
            .set("description", filter.describe())
            .set("project_args", project_args.clone())
            .set("filter", shell_quote(&filter.gcloud_expr("tags.items"))),
    )?;
    let firewall = FIREWALL_SCRIPT.render(
        &Vars::new()
            .set("description", filter.describe())
            .set("project_args", project_args)
            .set("filter", shell_quote(&filter.gcloud_expr("targetTags.list()"))),
    )?;
    Ok(TeardownScripts {
        instances,
        firewall,
    })
}

/// Write both scripts into `dir` as executables. Existing files are replaced.
pub fn write_scripts(
    dir: &Path,
    filter: &TeardownFilter,
    project: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let scripts = render_scripts(filter, project)?;
    let instances = paths::teardown_instances_path(dir);
    let firewall = paths::teardown_firewall_path(dir);
    io::write_executable(&instances, &scripts.instances)?;
    io::write_executable(&firewall, &scripts.firewall)?;
    tracing::debug!(dir = %dir.display(), "teardown scripts written");
    Ok(vec![instances, firewall])
}

const INSTANCES_SCRIPT: Template = Template::new(
    "teardown-instances",
    r#"#!/usr/bin/env bash
# Delete compute instances matching {{description}}.
# Generated by fleet. Safe to re-run.
set -uo pipefail

PROJECT_ARGS=({{project_args}})
FILTER={{filter}}

if ! LIST="$(gcloud compute instances list ${PROJECT_ARGS[@]+"${PROJECT_ARGS[@]}"} \
    --filter="$FILTER" --format='value(name,zone.basename())')"; then
  echo "failed to list instances" >&2
  exit 1
fi
ROWS=()
if [ -n "$LIST" ]; then
  mapfile -t ROWS <<<"$LIST"
fi

if [ "${#ROWS[@]}" -eq 0 ]; then
  echo "No matching instances."
  exit 0
fi

echo "The following instances will be deleted:"
printf '  %s\n' "${ROWS[@]}"
read -r -p "Proceed? [y/N] " ANSWER || ANSWER=""
case "$ANSWER" in
  [yY] | [yY][eE][sS]) ;;
  *) echo "Aborted, nothing deleted."; exit 0 ;;
esac

DELETED=0
FAILED=0
for ROW in "${ROWS[@]}"; do
  read -r NAME ZONE <<<"$ROW"
  if gcloud compute instances delete "$NAME" --zone="$ZONE" \
      ${PROJECT_ARGS[@]+"${PROJECT_ARGS[@]}"} --quiet; then
    DELETED=$((DELETED + 1))
  else
    echo "failed to delete instance $NAME" >&2
    FAILED=$((FAILED + 1))
  fi
done

echo "Instances deleted: $DELETED, failed: $FAILED"
[ "$FAILED" -eq 0 ]
"#,
);

const FIREWALL_SCRIPT: Template = Template::new(
    "teardown-firewall",
    r#"#!/usr/bin/env bash
# Delete firewall rules matching {{description}}.
# Generated by fleet. Run teardown-instances.sh first. Safe to re-run.
set -uo pipefail

PROJECT_ARGS=({{project_args}})
FILTER={{filter}}

if ! LIST="$(gcloud compute firewall-rules list ${PROJECT_ARGS[@]+"${PROJECT_ARGS[@]}"} \
    --filter="$FILTER" --format='value(name)')"; then
  echo "failed to list firewall rules" >&2
  exit 1
fi
RULES=()
if [ -n "$LIST" ]; then
  mapfile -t RULES <<<"$LIST"
fi

if [ "${#RULES[@]}" -eq 0 ]; then
  echo "No matching firewall rules."
  exit 0
fi

echo "The following firewall rules will be deleted:"
printf '  %s\n' "${RULES[@]}"
read -r -p "Proceed? [y/N] " ANSWER || ANSWER=""
case "$ANSWER" in
  [yY] | [yY][eE][sS]) ;;
  *) echo "Aborted, nothing deleted."; exit 0 ;;
esac

DELETED=0
FAILED=0
for RULE in "${RULES[@]}"; do
  if gcloud compute firewall-rules delete "$RULE" \
      ${PROJECT_ARGS[@]+"${PROJECT_ARGS[@]}"} --quiet; then
    DELETED=$((DELETED + 1))
  else
    echo "failed to delete firewall rule $RULE" >&2
    FAILED=$((FAILED + 1))
  fi
done

echo "Firewall rules deleted: $DELETED, failed: $FAILED"
[ "$FAILED" -eq 0 ]
"#,
);
