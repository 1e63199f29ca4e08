//! Schema documents: Felis-style YAML descriptions of one data schema.
//!
//! Only the keys that feed TAP_SCHEMA are modelled; everything else in a
//! document (database-specific hints, FITS keywords, ...) is ignored.
//! After parsing, missing `@id`s are generated from names and every id
//! reference (primary keys, indexes, foreign keys) is checked.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{TapError, TapResult};

/// Felis column datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    Unicode,
    Text,
    Binary,
    Timestamp,
}

impl Datatype {
    /// VOTable datatype written to `columns.datatype`.
    pub fn votable(self) -> &'static str {
        match self {
            Datatype::Boolean => "boolean",
            Datatype::Byte | Datatype::Binary => "unsignedByte",
            Datatype::Short => "short",
            Datatype::Int => "int",
            Datatype::Long => "long",
            Datatype::Float => "float",
            Datatype::Double => "double",
            Datatype::Char | Datatype::String | Datatype::Text | Datatype::Timestamp => "char",
            Datatype::Unicode => "unicodeChar",
        }
    }

    /// Default VOTable arraysize. Fixed-width `char` uses its length;
    /// variable-length types are unbounded.
    pub fn arraysize(self, length: Option<i32>) -> Option<String> {
        match self {
            Datatype::Char => length.map(|l| l.to_string()),
            Datatype::String
            | Datatype::Unicode
            | Datatype::Text
            | Datatype::Binary
            | Datatype::Timestamp => Some("*".to_string()),
            _ => None,
        }
    }

    pub fn xtype(self) -> Option<&'static str> {
        match self {
            Datatype::Timestamp => Some("timestamp"),
            _ => None,
        }
    }
}

/// A YAML scalar that may be written as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// One id or a list of ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn ids(&self) -> &[String] {
        match self {
            OneOrMany::One(id) => std::slice::from_ref(id),
            OneOrMany::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    pub name: String,
    #[serde(rename = "@id")]
    pub id: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "votable:utype")]
    pub utype: Option<String>,
    #[serde(rename = "tap:schema_index")]
    pub schema_index: Option<i32>,
    #[serde(default)]
    pub tables: Vec<TableDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableDocument {
    pub name: String,
    #[serde(rename = "@id")]
    pub id: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "votable:utype")]
    pub utype: Option<String>,
    #[serde(rename = "tap:table_index")]
    pub table_index: Option<i32>,
    #[serde(rename = "primaryKey")]
    pub primary_key: Option<OneOrMany>,
    #[serde(default)]
    pub columns: Vec<ColumnDocument>,
    #[serde(default)]
    pub indexes: Vec<IndexDocument>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDocument {
    pub name: String,
    #[serde(rename = "@id")]
    pub id: Option<String>,
    pub datatype: Datatype,
    pub length: Option<i32>,
    pub description: Option<String>,
    #[serde(rename = "ivoa:unit")]
    pub unit: Option<String>,
    #[serde(rename = "fits:tunit")]
    pub fits_unit: Option<String>,
    #[serde(rename = "ivoa:ucd")]
    pub ucd: Option<String>,
    #[serde(rename = "votable:utype")]
    pub utype: Option<String>,
    #[serde(rename = "votable:datatype")]
    pub votable_datatype: Option<String>,
    #[serde(rename = "votable:arraysize")]
    pub votable_arraysize: Option<Scalar>,
    #[serde(rename = "votable:xtype")]
    pub votable_xtype: Option<String>,
    #[serde(rename = "tap:principal")]
    pub principal: Option<i32>,
    #[serde(rename = "tap:std")]
    pub std: Option<i32>,
    #[serde(rename = "tap:column_index")]
    pub column_index: Option<i32>,
}

impl ColumnDocument {
    pub fn votable_datatype(&self) -> String {
        self.votable_datatype
            .clone()
            .unwrap_or_else(|| self.datatype.votable().to_string())
    }

    pub fn arraysize(&self) -> Option<String> {
        match &self.votable_arraysize {
            Some(size) => Some(size.to_string()),
            None => self.datatype.arraysize(self.length),
        }
    }

    pub fn xtype(&self) -> Option<String> {
        self.votable_xtype
            .clone()
            .or_else(|| self.datatype.xtype().map(str::to_string))
    }

    /// `ivoa:unit`, falling back to the FITS unit.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref().or(self.fits_unit.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexDocument {
    pub name: String,
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintDocument {
    pub name: String,
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@type")]
    pub kind: String,
    pub description: Option<String>,
    #[serde(rename = "votable:utype")]
    pub utype: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(rename = "referencedColumns", default)]
    pub referenced_columns: Vec<String>,
}

impl ConstraintDocument {
    pub fn is_foreign_key(&self) -> bool {
        self.kind == "ForeignKey"
    }

    /// Key identifier: the constraint id without its leading `#`.
    pub fn key_id(&self) -> &str {
        let id = self.id.as_deref().unwrap_or(&self.name);
        id.strip_prefix('#').unwrap_or(id)
    }
}

/// A column located by id.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    pub table: &'a TableDocument,
    pub column: &'a ColumnDocument,
}

impl SchemaDocument {
    /// Read and parse a document file.
    pub fn from_path(path: &Path) -> TapResult<Self> {
        let content = std::fs::read_to_string(path).map_err(TapError::io(path))?;
        Self::parse(&content).map_err(|reason| TapError::Document {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse YAML text, generate missing ids and check references.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut doc: SchemaDocument = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        doc.generate_ids();
        doc.check_references()?;
        Ok(doc)
    }

    /// Table name qualified with the schema name, as TAP_SCHEMA stores it.
    pub fn qualified_table_name(&self, table: &TableDocument) -> String {
        format!("{}.{}", self.name, table.name)
    }

    fn generate_ids(&mut self) {
        self.id.get_or_insert_with(|| format!("#{}", self.name));
        for table in &mut self.tables {
            let table_name = table.name.clone();
            table.id.get_or_insert_with(|| format!("#{table_name}"));
            for column in &mut table.columns {
                let id = format!("#{table_name}.{}", column.name);
                column.id.get_or_insert(id);
            }
            for index in &mut table.indexes {
                let id = format!("#{}", index.name);
                index.id.get_or_insert(id);
            }
            for constraint in &mut table.constraints {
                let id = format!("#{}", constraint.name);
                constraint.id.get_or_insert(id);
            }
        }
    }

    /// Index of every column by id.
    pub fn columns_by_id(&self) -> HashMap<&str, ColumnRef<'_>> {
        let mut out = HashMap::new();
        for table in &self.tables {
            for column in &table.columns {
                if let Some(id) = column.id.as_deref() {
                    out.insert(id, ColumnRef { table, column });
                }
            }
        }
        out
    }

    /// Ids of columns that are part of a primary key or an index.
    pub fn indexed_column_ids(&self) -> HashSet<&str> {
        let mut out = HashSet::new();
        for table in &self.tables {
            if let Some(pk) = &table.primary_key {
                out.extend(pk.ids().iter().map(String::as_str));
            }
            for index in &table.indexes {
                out.extend(index.columns.iter().map(String::as_str));
            }
        }
        out
    }

    fn check_references(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        let mut table_names = HashSet::new();
        for table in &self.tables {
            if !table_names.insert(table.name.as_str()) {
                return Err(format!("duplicate table name '{}'", table.name));
            }
            let ids = table
                .columns
                .iter()
                .filter_map(|c| c.id.as_deref())
                .chain(table.id.as_deref());
            for id in ids {
                if !seen.insert(id) {
                    return Err(format!("duplicate id '{id}'"));
                }
            }
        }

        let columns = self.columns_by_id();
        let known = |id: &String| -> Result<(), String> {
            if columns.contains_key(id.as_str()) {
                Ok(())
            } else {
                Err(format!("reference to unknown column '{id}'"))
            }
        };

        for table in &self.tables {
            if let Some(pk) = &table.primary_key {
                pk.ids().iter().try_for_each(known)?;
            }
            for index in &table.indexes {
                index.columns.iter().try_for_each(known)?;
            }
            for constraint in table.constraints.iter().filter(|c| c.is_foreign_key()) {
                constraint.columns.iter().try_for_each(known)?;
                constraint.referenced_columns.iter().try_for_each(known)?;
                if constraint.columns.is_empty()
                    || constraint.columns.len() != constraint.referenced_columns.len()
                {
                    return Err(format!(
                        "foreign key '{}' must pair each column with one referenced column",
                        constraint.name
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
name: sample
description: Sample catalog
tap:schema_index: 2
tables:
  - name: Object
    tap:table_index: 1
    primaryKey: "#Object.objectId"
    columns:
      - name: objectId
        datatype: long
        ivoa:ucd: meta.id;src
        tap:principal: 1
      - name: band
        datatype: char
        length: 1
      - name: label
        datatype: string
        length: 64
        fits:tunit: ""
      - name: observed
        datatype: timestamp
        votable:arraysize: 23
  - name: Source
    "@id": "#Source"
    columns:
      - name: sourceId
        datatype: long
      - name: objectId
        datatype: long
    indexes:
      - name: IDX_Source_objectId
        columns: ["#Source.objectId"]
    constraints:
      - name: FK_Source_Object
        "@type": ForeignKey
        description: Source to Object
        columns: ["#Source.objectId"]
        referencedColumns: ["#Object.objectId"]
"##;

    #[test]
    fn generates_missing_ids() {
        let doc = SchemaDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.id.as_deref(), Some("#sample"));
        assert_eq!(doc.tables[0].id.as_deref(), Some("#Object"));
        assert_eq!(doc.tables[0].columns[1].id.as_deref(), Some("#Object.band"));
        assert_eq!(doc.tables[1].constraints[0].key_id(), "FK_Source_Object");
    }

    #[test]
    fn datatype_mapping() {
        let doc = SchemaDocument::parse(SAMPLE).unwrap();
        let cols = &doc.tables[0].columns;
        assert_eq!(cols[0].votable_datatype(), "long");
        assert_eq!(cols[0].arraysize(), None);
        assert_eq!(cols[1].arraysize().as_deref(), Some("1"));
        assert_eq!(cols[2].votable_datatype(), "char");
        assert_eq!(cols[2].arraysize().as_deref(), Some("*"));
        assert_eq!(cols[3].xtype().as_deref(), Some("timestamp"));
        assert_eq!(cols[3].arraysize().as_deref(), Some("23"));
    }

    #[test]
    fn indexed_columns_include_primary_keys() {
        let doc = SchemaDocument::parse(SAMPLE).unwrap();
        let indexed = doc.indexed_column_ids();
        assert!(indexed.contains("#Object.objectId"));
        assert!(indexed.contains("#Source.objectId"));
        assert!(!indexed.contains("#Source.sourceId"));
    }

    #[test]
    fn qualified_table_name_uses_schema() {
        let doc = SchemaDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.qualified_table_name(&doc.tables[1]), "sample.Source");
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let text = SAMPLE.replace("referencedColumns: [\"#Object.objectId\"]", "referencedColumns: [\"#Nope.id\"]");
        let err = SchemaDocument::parse(&text).unwrap_err();
        assert!(err.contains("#Nope.id"));
    }

    #[test]
    fn unknown_datatype_is_rejected() {
        let text = "name: s\ntables:\n  - name: t\n    columns:\n      - name: c\n        datatype: quaternion\n";
        assert!(SchemaDocument::parse(text).is_err());
    }

    #[test]
    fn from_path_reports_document_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: [unterminated").unwrap();
        let err = SchemaDocument::from_path(&path).unwrap_err();
        assert!(matches!(err, TapError::Document { path: ref p, .. } if p == &path));
    }
}
