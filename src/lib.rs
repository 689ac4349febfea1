// Basic record types shared by every stage
pub mod types;
// Error taxonomy: schema, parse, integrity and write failures
pub mod error;
// Run configuration, from the CLI and an optional TOML file
pub mod config;

// Input source trait with file and in-memory DataFrame connectors
pub mod loader;
// Stage 1: drop transactions touching a contract address
pub mod filter;
// Stage 2: parse timestamps/values and fix the chronological order
pub mod normalize;
// Stage 3: deterministic address -> node id mapping
pub mod index;
// Stage 4: illicit flags for edges, sanction flags for nodes
pub mod label;
// Stage 5: temporal train/val split
pub mod split;
// Output tables and split descriptor, written all-or-nothing
pub mod writer;

// Wires the stages together and produces the run report
pub mod pipeline;
// Graph statistics over the finished edge set
pub mod summary;
