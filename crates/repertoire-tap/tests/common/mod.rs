//! Shared fixtures for repertoire-tap integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use repertoire_tap::download::SCHEMA_SUBDIR;
use repertoire_tap::{SchemaSource, TapResult, UpdatePlan};

pub const VERSION: &str = "w.2025.43";

/// A small schema document with two tables and a foreign key.
pub fn schema_yaml(name: &str) -> String {
    format!(
        r##"name: {name}
description: Test schema {name}
tables:
  - name: Object
    primaryKey: "#Object.objectId"
    columns:
      - name: objectId
        datatype: long
      - name: ra
        datatype: double
        ivoa:unit: deg
  - name: Source
    columns:
      - name: sourceId
        datatype: long
      - name: objectId
        datatype: long
    constraints:
      - name: FK_{name}_Source_Object
        "@type": ForeignKey
        columns: ["#Source.objectId"]
        referencedColumns: ["#Object.objectId"]
"##
    )
}

/// Gzip-compressed tar holding `docs` in the release layout.
pub fn release_archive(docs: &[&str]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for name in docs {
        let body = schema_yaml(name);
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        let path = format!("sdm_schemas-{VERSION}/{SCHEMA_SUBDIR}/{name}.yaml");
        builder.append_data(&mut header, path, body.as_bytes()).unwrap();
    }
    gzip(&builder.into_inner().unwrap())
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(bytes).unwrap();
    gz.finish().unwrap()
}

pub fn plan(schemas: &[&str]) -> UpdatePlan {
    plan_for(VERSION, schemas)
}

pub fn plan_for(version: &str, schemas: &[&str]) -> UpdatePlan {
    UpdatePlan {
        version: version.to_string(),
        schemas: schemas.iter().map(|s| s.to_string()).collect(),
        source_template: "https://example.invalid/{version}.tar.gz".to_string(),
        table_postfix: "11".to_string(),
        tap_schema_extensions: None,
    }
}

/// Serves documents from a local directory instead of downloading.
pub struct LocalSource {
    docs: Vec<String>,
}

impl LocalSource {
    pub fn new(docs: &[&str]) -> Self {
        Self {
            docs: docs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl SchemaSource for LocalSource {
    async fn fetch(&self, version: &str, _template: &str, work_dir: &Path) -> TapResult<PathBuf> {
        let dir = work_dir.join(version);
        std::fs::create_dir_all(&dir).unwrap();
        for name in &self.docs {
            std::fs::write(dir.join(format!("{name}.yaml")), schema_yaml(name)).unwrap();
        }
        Ok(dir)
    }
}
