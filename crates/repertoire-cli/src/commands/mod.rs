pub mod tap_schema;
