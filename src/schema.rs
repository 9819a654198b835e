use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dom::{ElemId, KmlDom};

/// Decoder selected for a declared schema field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Number,
    NonNegativeInteger,
    String,
}

impl FieldKind {
    /// Map a KML SimpleField `type` attribute to a decoder. Unknown types
    /// fall back to string.
    pub fn from_declared_type(ty: &str) -> FieldKind {
        match ty.to_ascii_lowercase().as_str() {
            "bool" => FieldKind::Bool,
            "int" | "short" | "float" | "double" => FieldKind::Number,
            "uint" | "ushort" => FieldKind::NonNegativeInteger,
            _ => FieldKind::String,
        }
    }

    pub fn decode(&self, text: &str) -> Option<FieldValue> {
        let text = text.trim();
        match self {
            FieldKind::Bool => match text {
                "1" | "true" => Some(FieldValue::Bool(true)),
                "0" | "false" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            FieldKind::Number => text.parse::<f64>().ok().map(FieldValue::Number),
            FieldKind::NonNegativeInteger => text.parse::<u64>().ok().map(FieldValue::UInt),
            FieldKind::String => Some(FieldValue::String(text.to_string())),
        }
    }
}

/// A decoded feature property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    UInt(u64),
    String(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// The compiled decoder set for one schema declaration.
#[derive(Debug, Clone, Default)]
pub struct SchemaFields {
    pub parent: Option<String>,
    pub fields: HashMap<String, FieldKind>,
}

/// Registry of schema-declared field decoders, keyed by schema name.
///
/// Populated by a pre-scan over the document and consulted read-only during
/// traversal. Remains extendable at parse time via [`SchemaRegistry::register`].
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaFields>,
}

impl SchemaRegistry {
    /// Scan for Schema declarations anywhere under the document root and
    /// compile a decoder table for each.
    pub fn compile(dom: &KmlDom) -> SchemaRegistry {
        let mut registry = SchemaRegistry::default();
        for schema in dom.find_all("Schema") {
            registry.register(dom, schema);
        }
        registry
    }

    /// Register one Schema element. Schemas with no usable fields are not
    /// registered as new payload tags.
    pub fn register(&mut self, dom: &KmlDom, schema: ElemId) {
        let name = match dom.attr(schema, "name") {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return,
        };

        let mut fields = HashMap::new();
        for field in dom.children_by_name(schema, "SimpleField") {
            let field_name = match dom.attr(field, "name") {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            let kind = FieldKind::from_declared_type(dom.attr(field, "type").unwrap_or(""));
            fields.insert(field_name, kind);
        }

        if fields.is_empty() {
            return;
        }

        self.schemas.insert(
            name,
            SchemaFields {
                parent: dom.attr(schema, "parent").map(|p| p.to_string()),
                fields,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&SchemaFields> {
        self.schemas.get(name)
    }

    /// Whether a tag names a registered schema (and therefore a feature-like
    /// leaf element).
    pub fn is_schema_tag(&self, tag: &str) -> bool {
        self.schemas.contains_key(tag)
    }

    /// The parent chain starting at `tag`: the tag's own schema first, then
    /// each declared parent in order. The chain ends when a parent is
    /// unregistered; a parent named "Placemark" terminates the chain at the
    /// standard placemark decoder, signalled by the final `true`.
    pub fn chain(&self, tag: &str) -> (Vec<&SchemaFields>, bool) {
        let mut out = Vec::new();
        let mut reaches_placemark = tag == "Placemark";
        let mut current = self.schemas.get(tag);
        while let Some(set) = current {
            out.push(set);
            match set.parent.as_deref() {
                Some("Placemark") => {
                    reaches_placemark = true;
                    current = None;
                }
                Some(parent) => current = self.schemas.get(parent),
                None => current = None,
            }
        }
        (out, reaches_placemark)
    }
}
