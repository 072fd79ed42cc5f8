pub mod brand;
pub mod canvas;
pub mod events;
pub mod json;
pub mod layout;
pub mod models;
pub mod runs;
