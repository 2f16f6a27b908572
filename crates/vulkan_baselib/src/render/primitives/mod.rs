//! Renderable primitives
//!
//! Mesh primitives and instances, materials, uniform blocks shared with the
//! shaders, procedural shapes and the orbit camera.

pub mod manipulator;
pub mod material;
pub mod mesh_instance;
pub mod mesh_primitive;
pub mod render_data;
pub mod shapes;

pub use manipulator::Manipulator;
pub use material::{material_set_bindings, Material};
pub use mesh_instance::MeshInstance;
pub use mesh_primitive::{attribute_location, MeshPrimitive};
pub use render_data::{perspective, Mvp, ParallelLight, PbrFactors, PointLight};
pub use shapes::Sphere;
