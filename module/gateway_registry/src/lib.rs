//! Agent and skill discovery: walk a directory of subdirectories, read a
//! front-matter file from each,
//! parse YAML between the first two `---` lines, skip (log, don't fail)
//! any entry that doesn't parse, dedupe by lowercased name, and cache the
//! scan with a coarse TTL since a filesystem walk on every request would
//! be wasteful for something that rarely changes.

use std::collections::HashSet;
use std::path::PathBuf;
#[cfg(test)]
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use gateway_types::{Error, Result};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Where an entry was discovered. Project-local entries win name clashes
/// over the global set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location
{
  Project,
  Global,
}

#[derive(Debug, Deserialize)]
struct AgentFrontmatter
{
  name: String,
  description: String,
  #[serde(default)]
  tools: Vec<String>,
  #[serde(default)]
  allowed_tools: Vec<String>,
  model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter
{
  name: String,
  description: String,
  command: Option<String>,
}

/// A discovered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor
{
  pub name: String,
  pub description: String,
  pub tools: Vec<String>,
  pub model: Option<String>,
}

/// A discovered skill.
#[derive(Debug, Clone, Serialize)]
pub struct SkillDescriptor
{
  pub name: String,
  pub description: String,
  pub command: Option<String>,
}

/// Split `---\n<yaml>\n---\n<body>` front-matter out of a file's content.
fn split_frontmatter(content: &str) -> std::result::Result<(&str, &str), String>
{
  let rest = content.strip_prefix("---").ok_or_else(|| "missing frontmatter delimiter".to_string())?;
  let rest = rest.strip_prefix('\n').unwrap_or(rest);
  let end = rest.find("\n---").ok_or_else(|| "unterminated frontmatter".to_string())?;
  let yaml = &rest[..end];
  let body = &rest[end + 4..];
  Ok((yaml, body.trim_start_matches('\n')))
}

fn scan_descriptors<T, F>(roots: &[(PathBuf, Location)], metadata_filename: &str, parse: F) -> Vec<T>
where
  F: Fn(&str) -> std::result::Result<T, String>,
  T: HasName,
{
  let mut out = Vec::new();
  let mut seen = HashSet::new();

  for (root, _location) in roots
  {
    if !root.is_dir()
    {
      continue;
    }
    let Ok(entries) = std::fs::read_dir(root) else { continue };
    for entry in entries.flatten()
    {
      let Ok(ft) = entry.file_type() else { continue };
      if !ft.is_dir()
      {
        continue;
      }
      let meta_file = entry.path().join(metadata_filename);
      let Ok(content) = std::fs::read_to_string(&meta_file) else { continue };

      let descriptor = match split_frontmatter(&content).and_then(|(yaml, _body)| parse(yaml))
      {
        Ok(v) => v,
        Err(reason) =>
        {
          tracing::warn!(path = %meta_file.display(), %reason, "skipping malformed registry entry");
          continue;
        }
      };

      let key = descriptor.name().to_ascii_lowercase();
      if seen.contains(&key)
      {
        continue;
      }
      seen.insert(key);
      out.push(descriptor);
    }
  }

  out.sort_by(|a, b| a.name().cmp(b.name()));
  out
}

trait HasName
{
  fn name(&self) -> &str;
}

impl HasName for AgentDescriptor
{
  fn name(&self) -> &str
  {
    &self.name
  }
}

impl HasName for SkillDescriptor
{
  fn name(&self) -> &str
  {
    &self.name
  }
}

struct Snapshot
{
  agents: Vec<AgentDescriptor>,
  skills: Vec<SkillDescriptor>,
  taken_at: Instant,
}

/// Agent/skill discovery, cached with a coarse TTL. Process-local, not
/// shared across gateway instances.
pub struct Registry
{
  agents_dir: PathBuf,
  skills_dir: PathBuf,
  ttl: Duration,
  cache: RwLock<Option<Snapshot>>,
}

impl Registry
{
  /// Create a registry scanning the two given directories.
  #[must_use]
  pub fn new(agents_dir: impl Into<PathBuf>, skills_dir: impl Into<PathBuf>) -> Self
  {
    Self { agents_dir: agents_dir.into(), skills_dir: skills_dir.into(), ttl: DEFAULT_TTL, cache: RwLock::new(None) }
  }

  /// Override the cache TTL (used by tests to force rescans).
  #[must_use]
  pub fn with_ttl(mut self, ttl: Duration) -> Self
  {
    self.ttl = ttl;
    self
  }

  fn scan(&self) -> (Vec<AgentDescriptor>, Vec<SkillDescriptor>)
  {
    let agents = scan_descriptors(&[(self.agents_dir.clone(), Location::Project)], "AGENT.md", |yaml| {
      let fm: AgentFrontmatter = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
      let mut tools = fm.tools;
      tools.extend(fm.allowed_tools);
      Ok(AgentDescriptor { name: fm.name, description: fm.description, tools, model: fm.model })
    });

    let skills = scan_descriptors(&[(self.skills_dir.clone(), Location::Project)], "SKILL.md", |yaml| {
      let fm: SkillFrontmatter = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
      Ok(SkillDescriptor { name: fm.name, description: fm.description, command: fm.command })
    });

    (agents, skills)
  }

  async fn snapshot(&self) -> (Vec<AgentDescriptor>, Vec<SkillDescriptor>)
  {
    {
      let guard = self.cache.read().await;
      if let Some(snap) = guard.as_ref()
      {
        if snap.taken_at.elapsed() < self.ttl
        {
          return (snap.agents.clone(), snap.skills.clone());
        }
      }
    }

    let (agents, skills) = self.scan();
    let mut guard = self.cache.write().await;
    *guard = Some(Snapshot { agents: agents.clone(), skills: skills.clone(), taken_at: Instant::now() });
    (agents, skills)
  }

  /// List all known agents and skills, refreshing the cache if stale.
  pub async fn list(&self) -> (Vec<AgentDescriptor>, Vec<SkillDescriptor>)
  {
    self.snapshot().await
  }

  /// Force a rescan regardless of TTL.
  pub async fn refresh(&self) -> (Vec<AgentDescriptor>, Vec<SkillDescriptor>)
  {
    let (agents, skills) = self.scan();
    let mut guard = self.cache.write().await;
    *guard = Some(Snapshot { agents: agents.clone(), skills: skills.clone(), taken_at: Instant::now() });
    (agents, skills)
  }

  /// Names in `requested` that aren't registered agents.
  pub async fn validate_agents(&self, requested: &[String]) -> Vec<String>
  {
    let (agents, _) = self.list().await;
    let known: HashSet<&str> = agents.iter().map(|a| a.name.as_str()).collect();
    requested.iter().filter(|n| !known.contains(n.as_str())).cloned().collect()
  }

  /// Names in `requested` that aren't registered skills.
  pub async fn validate_skills(&self, requested: &[String]) -> Vec<String>
  {
    let (_, skills) = self.list().await;
    let known: HashSet<&str> = skills.iter().map(|s| s.name.as_str()).collect();
    requested.iter().filter(|n| !known.contains(n.as_str())).cloned().collect()
  }

  /// Prepend a description block for the named agents/skills to
  /// `base_prompt` and append an invocation-syntax hint. Purely additive:
  /// the base prompt's own text is untouched.
  ///
  /// # Errors
  /// `Error::PermissionDenied` naming the first unknown agent or skill,
  /// if any requested name isn't registered.
  pub async fn enrich_prompt(&self, base_prompt: &str, agent_names: &[String], skill_names: &[String]) -> Result<String>
  {
    let missing_agents = self.validate_agents(agent_names).await;
    if let Some(name) = missing_agents.first()
    {
      return Err(Error::PermissionDenied(name.clone()));
    }
    let missing_skills = self.validate_skills(skill_names).await;
    if let Some(name) = missing_skills.first()
    {
      return Err(Error::PermissionDenied(name.clone()));
    }

    let (agents, skills) = self.list().await;
    let mut preamble = String::new();

    if !agent_names.is_empty()
    {
      preamble.push_str("Available agents:\n");
      for name in agent_names
      {
        if let Some(agent) = agents.iter().find(|a| &a.name == name)
        {
          preamble.push_str(&format!("- {}: {}\n", agent.name, agent.description));
        }
      }
    }
    if !skill_names.is_empty()
    {
      preamble.push_str("Available skills:\n");
      for name in skill_names
      {
        if let Some(skill) = skills.iter().find(|s| &s.name == name)
        {
          preamble.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
      }
    }

    let mut enriched = String::new();
    if !preamble.is_empty()
    {
      enriched.push_str(&preamble);
      enriched.push('\n');
    }
    enriched.push_str(base_prompt);
    if !agent_names.is_empty() || !skill_names.is_empty()
    {
      enriched.push_str("\n\nInvoke an agent or skill by name using the tool-call syntax your runtime exposes for it.");
    }

    Ok(enriched)
  }
}

#[cfg(test)]
mod tests
{
  use super::*;
  use std::fs;

  fn write_agent(dir: &Path, name: &str, description: &str)
  {
    let agent_dir = dir.join(name);
    fs::create_dir_all(&agent_dir).unwrap();
    fs::write(
      agent_dir.join("AGENT.md"),
      format!("---\nname: {name}\ndescription: {description}\ntools: [\"bash\"]\n---\nbody\n"),
    )
    .unwrap();
  }

  fn write_skill(dir: &Path, name: &str, description: &str)
  {
    let skill_dir = dir.join(name);
    fs::create_dir_all(&skill_dir).unwrap();
    fs::write(skill_dir.join("SKILL.md"), format!("---\nname: {name}\ndescription: {description}\n---\nbody\n")).unwrap();
  }

  #[tokio::test]
  async fn lists_discovered_agents_and_skills()
  {
    let tmp = tempfile::tempdir().unwrap();
    let agents_dir = tmp.path().join("agents");
    let skills_dir = tmp.path().join("skills");
    write_agent(&agents_dir, "reviewer", "reviews code");
    write_skill(&skills_dir, "formatter", "formats code");

    let registry = Registry::new(&agents_dir, &skills_dir);
    let (agents, skills) = registry.list().await;
    assert_eq!(agents.len(), 1);
    assert_eq!(skills.len(), 1);
    assert_eq!(agents[0].name, "reviewer");
    assert_eq!(skills[0].name, "formatter");
  }

  #[tokio::test]
  async fn malformed_entry_is_skipped_not_fatal()
  {
    let tmp = tempfile::tempdir().unwrap();
    let agents_dir = tmp.path().join("agents");
    fs::create_dir_all(agents_dir.join("broken")).unwrap();
    fs::write(agents_dir.join("broken").join("AGENT.md"), "not frontmatter at all").unwrap();
    write_agent(&agents_dir, "good", "a good agent");

    let registry = Registry::new(&agents_dir, tmp.path().join("skills"));
    let (agents, _) = registry.list().await;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].name, "good");
  }

  #[tokio::test]
  async fn validate_agents_reports_missing_names()
  {
    let tmp = tempfile::tempdir().unwrap();
    let agents_dir = tmp.path().join("agents");
    write_agent(&agents_dir, "reviewer", "reviews code");

    let registry = Registry::new(&agents_dir, tmp.path().join("skills"));
    let missing = registry.validate_agents(&["reviewer".to_string(), "ghost".to_string()]).await;
    assert_eq!(missing, vec!["ghost".to_string()]);
  }

  #[tokio::test]
  async fn enrich_prompt_is_additive_and_rejects_unknown_names()
  {
    let tmp = tempfile::tempdir().unwrap();
    let agents_dir = tmp.path().join("agents");
    write_agent(&agents_dir, "reviewer", "reviews code");
    let registry = Registry::new(&agents_dir, tmp.path().join("skills"));

    let enriched = registry.enrich_prompt("do the thing", &["reviewer".to_string()], &[]).await.unwrap();
    assert!(enriched.contains("do the thing"));
    assert!(enriched.contains("reviewer"));

    let err = registry.enrich_prompt("do the thing", &["ghost".to_string()], &[]).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(name) if name == "ghost"));
  }

  #[tokio::test]
  async fn cache_respects_ttl_until_refresh()
  {
    let tmp = tempfile::tempdir().unwrap();
    let agents_dir = tmp.path().join("agents");
    write_agent(&agents_dir, "reviewer", "reviews code");
    let registry = Registry::new(&agents_dir, tmp.path().join("skills")).with_ttl(Duration::from_secs(60));

    let (first, _) = registry.list().await;
    assert_eq!(first.len(), 1);

    write_agent(&agents_dir, "second", "another agent");
    let (cached, _) = registry.list().await;
    assert_eq!(cached.len(), 1, "still within TTL, cache not invalidated");

    let (refreshed, _) = registry.refresh().await;
    assert_eq!(refreshed.len(), 2);
  }
}
