//! Test case generation from the flag space.
//!
//! Every test case is one assignment of a value to each of the ten payload
//! flags, rendered as a flag string, crossed with every selected image class.
//! An experiment either runs every permutation (`ALL`) or a set of batches,
//! each pinning one flag to a single value while the others range freely.

use fleet_types::{ImageClass, NewTestCase};
use thiserror::Error;

/// One payload flag and its permitted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flag {
    /// Flag key as passed to the payload.
    pub name: &'static str,
    /// Permitted values.
    pub values: &'static [&'static str],
}

const YES_NO: &[&str] = &["Yes", "No"];

/// The flag space, in flag-string order.
pub const FLAGS: [Flag; 10] = [
    Flag {
        name: "encr",
        values: &["ASY", "SYM"],
    },
    Flag {
        name: "trav",
        values: &["BFS", "DFS", "SUB"],
    },
    Flag {
        name: "writing",
        values: &["Yes", "No", "Tmp"],
    },
    Flag {
        name: "ext",
        values: YES_NO,
    },
    Flag {
        name: "merg",
        values: YES_NO,
    },
    Flag {
        name: "mid",
        values: YES_NO,
    },
    Flag {
        name: "sleep",
        values: YES_NO,
    },
    Flag {
        name: "small",
        values: YES_NO,
    },
    Flag {
        name: "large",
        values: YES_NO,
    },
    Flag {
        name: "default",
        values: YES_NO,
    },
];

/// Directory the payload starts from unless the selection overrides it.
pub const DEFAULT_ROOT: &str = "-root=.\\files";

/// Keyword selecting every permutation.
const ALL_KEYWORD: &str = "ALL";

/// Errors in experiment input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermutationError {
    /// A batch names a flag outside the flag space.
    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    /// A batch pins a flag to a value it cannot take.
    #[error("flag '{flag}' has no value '{value}'")]
    UnknownValue {
        /// Flag name.
        flag: String,
        /// Rejected value.
        value: String,
    },

    /// An entry is not of the form `flag=value`.
    #[error("malformed flag entry: {0}")]
    MalformedEntry(String),

    /// Neither `ALL` nor any batch was given.
    #[error("no flags selected (use ALL for every permutation)")]
    EmptySelection,

    /// The image list contains no image.
    #[error("no image classes given")]
    EmptyImageList,
}

/// A batch: one flag pinned to one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPin {
    flag: &'static str,
    value: &'static str,
}

impl BatchPin {
    /// Pin `flag` to `value`, validating both against the flag space.
    pub fn new(flag: &str, value: &str) -> Result<Self, PermutationError> {
        let spec = FLAGS
            .iter()
            .find(|f| f.name == flag)
            .ok_or_else(|| PermutationError::UnknownFlag(flag.to_string()))?;
        let value = spec
            .values
            .iter()
            .find(|v| **v == value)
            .ok_or_else(|| PermutationError::UnknownValue {
                flag: flag.to_string(),
                value: value.to_string(),
            })?;
        Ok(Self {
            flag: spec.name,
            value,
        })
    }

    /// Batch label stored with each row, `flag=value`.
    pub fn label(&self) -> String {
        format!("{}={}", self.flag, self.value)
    }
}

/// Which permutations an experiment runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every permutation of every flag.
    All,
    /// One run of permutations per pinned flag.
    Batches(Vec<BatchPin>),
}

/// Parsed flag selection plus the payload root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSpec {
    /// Which permutations to generate.
    pub selection: Selection,
    /// Root pair appended to every flag string.
    pub root: String,
}

/// Parse the flag selection input.
///
/// Accepts `ALL` or a comma-separated list of `flag=value` batches. An entry
/// containing `;` replaces the root pair appended to every flag string.
pub fn parse_selection(input: &str) -> Result<SelectionSpec, PermutationError> {
    let mut root = DEFAULT_ROOT.to_string();
    let mut batches = Vec::new();
    let mut all = false;

    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if entry == ALL_KEYWORD {
            all = true;
        } else if entry.contains(';') {
            root = entry.to_string();
        } else {
            let (flag, value) = entry
                .split_once('=')
                .ok_or_else(|| PermutationError::MalformedEntry(entry.to_string()))?;
            batches.push(BatchPin::new(flag.trim(), value.trim())?);
        }
    }

    let selection = if all {
        Selection::All
    } else if batches.is_empty() {
        return Err(PermutationError::EmptySelection);
    } else {
        Selection::Batches(batches)
    };

    Ok(SelectionSpec { selection, root })
}

/// Parse a comma-separated list of image classes.
pub fn parse_images(input: &str) -> Result<Vec<ImageClass>, PermutationError> {
    let images: Vec<ImageClass> = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ImageClass::new)
        .collect();

    if images.is_empty() {
        return Err(PermutationError::EmptyImageList);
    }
    Ok(images)
}

/// Every flag string for a batch (or every permutation when `pin` is `None`).
pub fn flag_strings(pin: Option<&BatchPin>, root: &str) -> Vec<String> {
    let mut partials = vec![String::new()];

    for flag in &FLAGS {
        let values: &[&str] = match pin {
            Some(pin) if pin.flag == flag.name => std::slice::from_ref(&pin.value),
            _ => flag.values,
        };

        partials = partials
            .iter()
            .flat_map(|prefix| {
                values
                    .iter()
                    .map(move |value| format!("{prefix}-{}={value} ", flag.name))
            })
            .collect();
    }

    partials.into_iter().map(|p| p + root).collect()
}

/// Generate the rows for an experiment: each flag string crossed with each image.
pub fn generate(
    experiment_name: &str,
    images: &[ImageClass],
    spec: &SelectionSpec,
) -> Vec<NewTestCase> {
    let batches: Vec<Option<&BatchPin>> = match &spec.selection {
        Selection::All => vec![None],
        Selection::Batches(pins) => pins.iter().map(Some).collect(),
    };

    let mut rows = Vec::new();
    for pin in batches {
        let label = pin.map(BatchPin::label);
        for flags in flag_strings(pin, &spec.root) {
            for image in images {
                rows.push(NewTestCase {
                    experiment_name: experiment_name.to_string(),
                    batch_label: label.clone(),
                    image_class: image.clone(),
                    flags: flags.clone(),
                });
            }
        }
    }
    rows
}
