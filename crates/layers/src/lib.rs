//! Layer composition for map products.
//!
//! A product JSON is parsed into a [`Product`] holding views, each view
//! holding an ordered list of layers. Generating the product walks the tree
//! once, reading data through the engine traits and producing a serializable
//! [`RenderOutput`]: a node tree plus the globals (paths, includes, css) the
//! nodes refer to.
//!
//! ```ignore
//! let engine = MemoryEngine::from_file(Path::new("engine.json"))?;
//! let mut state = State::new(Engines::from_memory(Arc::new(engine)));
//! let mut product = Product::init(config, &mut state)?;
//! let output = product.generate(&mut state)?;
//! ```

pub mod attribute_selection;
pub mod defs;
pub mod engine;
pub mod field;
pub mod intersection;
pub mod label;
pub mod layer;
pub mod layers;
pub mod node;
pub mod positions;
pub mod product;
pub mod projection;
pub mod properties;
pub mod state;
pub mod view;

pub use attribute_selection::AttributeSelection;
pub use defs::Defs;
pub use engine::{
    DataEngine, Engines, Gazetteer, GridData, GridQuery, Location, MemoryEngine, Observation, ObservationEngine,
    ObservationQuery, ShapeEngine, ShapeQuery,
};
pub use layer::{create_layer, Layer, LayerBase};
pub use layers::Layers;
pub use node::{Attributes, Globals, Node, RenderOutput};
pub use positions::{Point, Positions};
pub use product::Product;
pub use properties::Properties;
pub use self::projection::Projection;
pub use state::State;
pub use view::{View, Views};
