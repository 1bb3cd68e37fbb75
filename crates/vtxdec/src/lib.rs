//! Decoding of packed, per-draw vertex formats into a fixed layout.
//!
//! A [`VertexType`] describes how every attribute of a vertex is encoded. [`Plan::new`] turns it
//! into a short pipeline of [`Step`]s together with the [`DecodedLayout`] the pipeline writes,
//! and [`interp::decode`] runs the pipeline over a range of vertices.
pub mod descriptor;
pub mod index;
pub mod interp;
pub mod layout;
pub mod params;
pub mod plan;
pub mod reader;
pub mod step;

pub use descriptor::VertexType;
pub use index::{IndexBounds, IndexError, IndexReader, compute_bounds};
pub use interp::{DecodeError, InterpreterDecoder, VertexDecoder};
pub use layout::{Attribute, DecodedFormat, DecodedLayout};
pub use params::{BoneMatrix, DecodeParams, UvScale};
pub use plan::{Options, Plan, Planner};
pub use reader::VertexReader;
pub use step::Step;
