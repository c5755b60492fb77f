use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use crate::{DigestedDisclosures, DIGESTS_KEY, MAX_DEPTH};

/// Decoy digest generation mode of a single object level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecoyMode {
    /// No decoys.
    #[default]
    None,

    /// Exactly `decoys` decoy digests.
    Fixed,

    /// Between `1` and `decoys` decoy digests, drawn uniformly.
    Random,
}

/// Disclosure intent for one object property.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SdField {
    /// Whether the property is selectively disclosable as a whole.
    pub sd: bool,

    /// Disclosure intent for the properties of the (object) value.
    pub children: Option<SdMap>,
}

impl SdField {
    /// Creates a new field.
    pub fn new(sd: bool, children: Option<SdMap>) -> Self {
        Self { sd, children }
    }

    /// Selectively disclosable leaf.
    pub fn disclosable() -> Self {
        Self::new(true, None)
    }

    /// Returns the nested intent, if any property is described by it.
    pub fn children(&self) -> Option<&SdMap> {
        self.children.as_ref().filter(|c| !c.is_empty())
    }
}

/// Tree of selective disclosure intents.
///
/// Each level maps property names of a JSON object to an [`SdField`]. Names
/// missing from a level are plain claims: never disclosable, and not
/// recursed into. The decoy settings of a level are only used at issuance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SdMap {
    fields: BTreeMap<String, SdField>,
    decoy_mode: DecoyMode,
    decoys: usize,
}

impl SdMap {
    /// Creates a level without decoys.
    pub fn new(fields: BTreeMap<String, SdField>) -> Self {
        Self::with_decoys(fields, DecoyMode::None, 0)
    }

    /// Creates a level with the given decoy settings.
    pub fn with_decoys(
        fields: BTreeMap<String, SdField>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Self {
        Self {
            fields,
            decoy_mode,
            decoys,
        }
    }

    /// Derives the intent from a full payload and the payload that should
    /// remain visible without any disclosure.
    ///
    /// Properties missing from `undisclosed` become disclosable. Properties
    /// holding objects on both sides are recursed into.
    pub fn from_full_and_undisclosed(
        full: &Map<String, Value>,
        undisclosed: &Map<String, Value>,
    ) -> Self {
        Self::from_full_and_undisclosed_with_decoys(full, undisclosed, DecoyMode::None, 0)
    }

    /// Same as [`Self::from_full_and_undisclosed`], applying the given decoy
    /// settings to every level.
    pub fn from_full_and_undisclosed_with_decoys(
        full: &Map<String, Value>,
        undisclosed: &Map<String, Value>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Self {
        let fields = full
            .iter()
            .map(|(key, value)| {
                let field = match (value, undisclosed.get(key)) {
                    (_, None) => SdField::disclosable(),
                    (Value::Object(full), Some(Value::Object(undisclosed))) => SdField::new(
                        false,
                        Some(Self::from_full_and_undisclosed_with_decoys(
                            full,
                            undisclosed,
                            decoy_mode,
                            decoys,
                        )),
                    ),
                    _ => SdField::default(),
                };

                (key.clone(), field)
            })
            .collect();

        Self::with_decoys(fields, decoy_mode, decoys)
    }

    /// Builds the intent from dot-separated property paths.
    ///
    /// Every property named by a path, leaf or intermediate, becomes
    /// disclosable. For instance `["address.street", "age"]` makes `address`,
    /// `address.street` and `age` disclosable.
    ///
    /// Property names containing a `.` cannot be expressed.
    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::from_paths_with_decoys(paths, DecoyMode::None, 0)
    }

    /// Same as [`Self::from_paths`], applying the given decoy settings to
    /// every level.
    pub fn from_paths_with_decoys<I>(paths: I, decoy_mode: DecoyMode, decoys: usize) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in paths {
            let (head, rest) = match path.as_ref().split_once('.') {
                Some((head, rest)) => (head, rest),
                None => (path.as_ref(), ""),
            };

            let group = groups.entry(head.to_owned()).or_default();
            if !rest.is_empty() {
                group.push(rest.to_owned());
            }
        }

        let fields = groups
            .into_iter()
            .map(|(key, rest)| {
                let children = if rest.is_empty() {
                    None
                } else {
                    Some(Self::from_paths_with_decoys(rest, decoy_mode, decoys))
                };

                (key, SdField::new(true, children))
            })
            .collect();

        Self::with_decoys(fields, decoy_mode, decoys)
    }

    /// Rebuilds the intent matching an undisclosed payload and the
    /// disclosures available for it.
    ///
    /// Digests without a matching disclosure (decoys, withheld claims) and
    /// malformed `_sd` entries are skipped, as are repeated references to a
    /// disclosure. Objects nested deeper than [`crate::MAX_DEPTH`] get no
    /// children.
    pub fn regenerate(undisclosed: &Map<String, Value>, disclosures: &DigestedDisclosures) -> Self {
        Regenerator {
            disclosures,
            seen: BTreeSet::new(),
        }
        .regenerate(undisclosed, 0)
    }

    /// Returns the intent for `key`, if explicit.
    pub fn get(&self, key: &str) -> Option<&SdField> {
        self.fields.get(key)
    }

    /// Checks if `key` is selectively disclosable at this level.
    pub fn is_sd(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(|f| f.sd)
    }

    /// Returns the non-empty nested intent of `key`.
    pub fn children(&self, key: &str) -> Option<&SdMap> {
        self.fields.get(key).and_then(SdField::children)
    }

    /// Decoy mode of this level.
    pub fn decoy_mode(&self) -> DecoyMode {
        self.decoy_mode
    }

    /// Fixed or maximum number of decoys of this level.
    pub fn decoys(&self) -> usize {
        self.decoys
    }

    /// Number of properties explicitly described at this level.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Checks if no property is described at this level.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over the properties of this level.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SdField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Renders the tree as an indented list of `- key: sd` lines.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, indent: usize) {
        for (key, field) in &self.fields {
            out.extend(std::iter::repeat(' ').take(indent));
            out.push_str("- ");
            out.push_str(key);
            out.push_str(": ");
            out.push_str(if field.sd { "true" } else { "false" });
            out.push('\n');

            if let Some(children) = &field.children {
                children.pretty_print_into(out, indent + 2);
            }
        }
    }
}

impl FromIterator<(String, SdField)> for SdMap {
    fn from_iter<I: IntoIterator<Item = (String, SdField)>>(iter: I) -> Self {
        SdMap::new(iter.into_iter().collect())
    }
}

impl fmt::Display for SdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print())
    }
}

struct Regenerator<'a> {
    disclosures: &'a DigestedDisclosures,
    seen: BTreeSet<&'a str>,
}

impl<'a> Regenerator<'a> {
    fn regenerate(&mut self, undisclosed: &Map<String, Value>, depth: usize) -> SdMap {
        let mut fields = BTreeMap::new();

        if let Some(Value::Array(digests)) = undisclosed.get(DIGESTS_KEY) {
            for digest in digests.iter().filter_map(Value::as_str) {
                let Some((digest, disclosure)) = self.disclosures.get_key_value(digest) else {
                    continue;
                };

                if self.seen.insert(digest.as_str()) {
                    let field = self.field(true, disclosure.value(), depth);
                    fields.insert(disclosure.key().to_owned(), field);
                }
            }
        }

        for (key, value) in undisclosed {
            if key != DIGESTS_KEY {
                let field = self.field(false, value, depth);
                fields.insert(key.clone(), field);
            }
        }

        SdMap::new(fields)
    }

    fn field(&mut self, sd: bool, value: &Value, depth: usize) -> SdField {
        let children = match value {
            Value::Object(object) if depth + 1 < MAX_DEPTH => {
                Some(self.regenerate(object, depth + 1))
            }
            _ => None,
        };

        SdField::new(sd, children)
    }
}
