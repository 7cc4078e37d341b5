mod address;
mod definition;
mod state;


pub use {
    address::NodeAddress,
    definition::NodeDefinition,
    state::{ActiveNodeState, NodeStateCell},
};
