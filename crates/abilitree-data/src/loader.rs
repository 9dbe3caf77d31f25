//! Resolution pipeline: reads tree files, resolves name references, seeds a
//! gateway.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers, plus the import entry points built on them.

use crate::schema::TreeDocument;
use abilitree_core::attachment::AttachmentPoint;
use abilitree_core::geometry::{GridConfig, validate_tier_count};
use abilitree_core::graph::PrerequisiteGroup;
use abilitree_core::id::{AbilityId, AttachmentPointId, GroupId, TreeId};
use abilitree_core::tree::{Ability, AbilityDraft, AbilityKind, AbilityTree, TreeError, TreeRecord};
use abilitree_session::{
    AbilityUpdate, GatewayError, NewTree, PersistenceGateway, SessionError, TreeSession,
};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The document parsed but describes an invalid tree.
    #[error("invalid tree in {file}: {source}")]
    InvalidTree {
        file: PathBuf,
        #[source]
        source: TreeError,
    },

    /// Writing the imported tree failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name.
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Parse file content in the given format. `path` is only used for errors.
pub fn parse_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_str(&content, format, path)
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Tree documents
// ===========================================================================

/// Read a tree document from a `.ron`, `.json` or `.toml` file.
pub fn load_tree_document(path: &Path) -> Result<TreeDocument, DataLoadError> {
    deserialize_file(path)
}

/// Resolve a document into a validated tree.
///
/// Abilities get provisional ids equal to their position in the document;
/// [`import_tree`] replaces them with the ids the gateway assigns. Every
/// invariant of [`AbilityTree::from_records`] is checked here, so a
/// document that resolves can be written without surprises.
pub fn resolve_document(
    doc: TreeDocument,
    grid: &GridConfig,
    file: &Path,
) -> Result<AbilityTree, DataLoadError> {
    let invalid = |source: TreeError| DataLoadError::InvalidTree {
        file: file.to_path_buf(),
        source,
    };
    let tier_count = validate_tier_count(doc.tier_count).map_err(|e| invalid(e.into()))?;

    let mut ids: HashMap<String, AbilityId> = HashMap::new();
    for (index, ability) in doc.abilities.iter().enumerate() {
        check_duplicate(&ids, &ability.name, file)?;
        ids.insert(ability.name.clone(), AbilityId(index as u64));
    }

    let mut next_group = 0u32;
    let mut next_point = 0u32;
    let mut abilities = Vec::with_capacity(doc.abilities.len());
    for (index, data) in doc.abilities.into_iter().enumerate() {
        let mut prerequisites = Vec::with_capacity(data.prerequisites.len());
        for group in data.prerequisites {
            let (logic, names) = group.normalize();
            let members = names
                .iter()
                .map(|name| resolve_name(&ids, name, file, "ability").copied())
                .collect::<Result<BTreeSet<_>, _>>()?;
            prerequisites.push(PrerequisiteGroup {
                id: GroupId(next_group),
                logic,
                members,
            });
            next_group += 1;
        }

        let kind = match data.socket {
            None => AbilityKind::Plain,
            Some(socket) => {
                let id = AttachmentPointId(next_point);
                next_point += 1;
                AbilityKind::Socket(AttachmentPoint {
                    id,
                    allowed_type: socket.allowed_type,
                    attached_tree: None,
                })
            }
        };

        let canonical = grid.placement(data.tier, data.column.unwrap_or(0));
        abilities.push(Ability {
            id: AbilityId(index as u64),
            name: data.name,
            description: data.description,
            icon: data.icon,
            tier: data.tier,
            x: data.x.unwrap_or(canonical.x),
            y: data.y.unwrap_or(canonical.y),
            prerequisites,
            kind,
        });
    }

    let record = TreeRecord {
        id: TreeId(0),
        name: doc.name,
        tier_count,
        tree_type: doc.tree_type,
    };
    AbilityTree::from_records(record, abilities).map_err(invalid)
}

/// Load a tree document, write it through `gateway`, and open a session on
/// the stored tree.
///
/// If a write fails partway, the half-written tree is deleted again.
pub fn import_tree<G: PersistenceGateway>(
    path: &Path,
    gateway: G,
    grid: GridConfig,
) -> Result<TreeSession<G>, DataLoadError> {
    let doc = load_tree_document(path)?;
    let tree = resolve_document(doc, &grid, path)?;
    let id = seed(&gateway, &tree)?;
    info!(file = %path.display(), tree = %id, abilities = tree.len(), "imported tree");
    Ok(TreeSession::open(gateway, grid, id)?)
}

/// Write a resolved tree and return the id of the stored tree.
fn seed<G: PersistenceGateway>(gateway: &G, tree: &AbilityTree) -> Result<TreeId, SessionError> {
    let record = tree.record();
    let id = gateway.create_tree(&NewTree {
        name: record.name.clone(),
        tier_count: record.tier_count,
        tree_type: record.tree_type.clone(),
    })?;

    write_abilities(gateway, id, tree).map_err(|original| {
        match gateway.delete_tree(id) {
            Ok(()) => {
                warn!(tree = %id, error = %original, "import failed; removed partial tree");
                SessionError::Persistence(original)
            }
            Err(rollback) => SessionError::RollbackFailed { original, rollback },
        }
    })?;
    Ok(id)
}

fn write_abilities<G: PersistenceGateway>(
    gateway: &G,
    tree_id: TreeId,
    tree: &AbilityTree,
) -> Result<(), GatewayError> {
    let abilities = tree.abilities();

    // Create every record first so prerequisites can refer to real ids.
    let mut assigned: HashMap<AbilityId, AbilityId> = HashMap::with_capacity(abilities.len());
    for ability in &abilities {
        let draft = AbilityDraft {
            name: ability.name.clone(),
            description: ability.description.clone(),
            icon: ability.icon.clone(),
            tier: ability.tier,
            x: ability.x,
            y: ability.y,
            kind: ability.kind.clone(),
        };
        assigned.insert(ability.id, gateway.create_ability(tree_id, &draft)?);
    }

    for ability in &abilities {
        if ability.prerequisites.is_empty() {
            continue;
        }
        let groups = ability
            .prerequisites
            .iter()
            .map(|group| PrerequisiteGroup {
                members: group.members.iter().filter_map(|m| assigned.get(m).copied()).collect(),
                ..group.clone()
            })
            .collect();
        if let Some(&id) = assigned.get(&ability.id) {
            gateway.update_ability(id, &AbilityUpdate::prerequisites(groups))?;
        }
    }
    debug!(tree = %tree_id, abilities = abilities.len(), "seeded abilities");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
