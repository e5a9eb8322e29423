use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name paired with its raw `charm` reference, in bundle order.
type CharmList = Vec<(String, String)>;

// groups: namespace with trailing slash (optional), name, revision
static CHARM_MATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*cs:([~a-z0-9\-]+/)?([a-z0-9\-]+)-([0-9]+)\s*$")
        .expect("charm store pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmRevision {
    pub namespace: Option<String>,
    pub name: String,
    pub revision: String,
    pub reference: String,
}

impl CharmRevision {
    /// Matches a versioned charm store reference such as `cs:~user/mysql-7`.
    /// Anything else, including unversioned `cs:mysql` and local paths, is `None`.
    pub fn parse(reference: &str) -> Option<CharmRevision> {
        let caps = CHARM_MATCH.captures(reference)?;
        let namespace = caps
            .get(1)
            .map(|ns| ns.as_str().trim_end_matches('/').to_string());
        Some(CharmRevision {
            namespace,
            name: caps[2].to_string(),
            revision: caps[3].to_string(),
            reference: reference.to_string(),
        })
    }

    /// Charm identifier without the revision.
    pub fn id(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}/{}", namespace, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for CharmRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id(), self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    Stdin,
    File(PathBuf),
}

impl BundleSource {
    /// `-` selects standard input, anything else is a file path.
    pub fn new(path: impl AsRef<Path>) -> BundleSource {
        let path = path.as_ref();
        if path == Path::new("-") {
            BundleSource::Stdin
        } else {
            BundleSource::File(path.to_path_buf())
        }
    }

    pub fn open(&self) -> Result<Box<dyn Read>> {
        match self {
            BundleSource::Stdin => Ok(Box::new(std::io::stdin())),
            BundleSource::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open bundle {}", path.display()))?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Display for BundleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleSource::Stdin => f.write_str("<stdin>"),
            BundleSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub get_charms: bool,
}

/// Parses a bundle document and expands `<<` merge keys.
pub fn load_bundle<R: Read>(reader: R) -> Result<Value> {
    let mut bundle: Value = serde_yaml::from_reader(reader)?;
    bundle.apply_merge()?;
    Ok(bundle)
}

/// Reads `applications.<name>.charm` for every application in the bundle.
pub fn get_charms(bundle: &Value) -> Result<CharmList> {
    let applications = match bundle.get("applications") {
        Some(Value::Mapping(applications)) => applications,
        Some(_) => bail!("bundle `applications` is not a mapping"),
        None => bail!("bundle has no `applications` key"),
    };

    let mut charms = CharmList::with_capacity(applications.len());
    for (app, record) in applications {
        let app = key_label(app);
        if !record.is_mapping() {
            bail!("application `{}` is not a mapping", app);
        }
        let charm = match record.get("charm") {
            Some(Value::String(charm)) => charm.clone(),
            Some(_) => bail!("application `{}` has a non-string `charm` field", app),
            None => bail!("application `{}` has no `charm` key", app),
        };
        charms.push((app, charm));
    }
    Ok(charms)
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "~".to_string(),
        other => format!("{:?}", other),
    }
}

/// Parses one bundle and, when asked, prints `<charm-id> <reference>` per
/// versioned charm to `out`. Returns the number of charms printed.
///
/// Nothing is written before the whole bundle has been parsed and walked, so
/// a malformed or incomplete bundle produces no partial output.
pub fn process<R, O, E>(
    reader: R,
    source_name: &str,
    options: &Options,
    out: &mut O,
    err: &mut E,
) -> Result<usize>
where
    R: Read,
    O: Write,
    E: Write,
{
    let bundle =
        load_bundle(reader).with_context(|| format!("failed to parse bundle {}", source_name))?;
    if !options.get_charms {
        return Ok(0);
    }

    let charms = get_charms(&bundle).with_context(|| format!("invalid bundle {}", source_name))?;
    let mut found = 0;
    for (app, reference) in charms {
        match CharmRevision::parse(&reference) {
            Some(charm) => {
                debug!(app = %app, charm = %charm.id(), revision = %charm.revision, "charm revision");
                writeln!(out, "{}", charm)?;
                found += 1;
            }
            None => debug!(app = %app, reference = %reference, "no revision, skipping"),
        }
    }

    if found == 0 {
        writeln!(err, "WARNING: no valid charm revisions found in {}\n", source_name)?;
    }
    Ok(found)
}

pub fn process_source<O: Write, E: Write>(
    source: &BundleSource,
    options: &Options,
    out: &mut O,
    err: &mut E,
) -> Result<usize> {
    // the handle lives only for this call
    let reader = source.open()?;
    process(reader, &source.to_string(), options, out, err)
}
