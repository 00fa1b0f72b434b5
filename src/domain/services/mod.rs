pub mod composite;
pub mod factors;
pub mod normalization;
