mod catalog;
mod registry;

pub use catalog::{parse_catalog, CatalogModel, ModelPricing};
pub use registry::{
    is_pro_tier, ModelRegistry, ModelSelection, ModelSelector, ModelSpec, GEMINI_FLASH,
    GEMINI_FLASH_LITE, GEMINI_PRO,
};
