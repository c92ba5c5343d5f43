pub mod clamav;

#[cfg(feature = "link-check")]
pub mod links;
