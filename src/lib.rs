#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod canvas;
pub mod components;
pub mod logger;
pub mod ops;
pub mod view;
