use std::collections::BTreeMap;
use std::sync::Arc;

use super::{GameVariant, MinecraftBedrock, SteamGame, VariantContext, CATALOG};
use crate::management::error::OperationError;

type Constructor = Box<dyn Fn(&VariantContext) -> Arc<dyn GameVariant> + Send + Sync>;

/// Maps a config discriminator to the constructor of its game variant.
pub struct VariantRegistry {
    context: VariantContext,
    constructors: BTreeMap<String, Constructor>,
}

impl VariantRegistry {
    pub fn new(context: VariantContext) -> Self {
        Self {
            context,
            constructors: BTreeMap::new(),
        }
    }

    /// A registry holding every built-in game.
    pub fn with_catalog(context: VariantContext) -> Self {
        let mut registry = Self::new(context);
        for entry in CATALOG.iter() {
            registry.register(entry.class_name, move |context| {
                Arc::new(SteamGame::new(entry, context.clone()))
            });
        }
        registry.register(MinecraftBedrock::CLASS_NAME, |_| {
            Arc::new(MinecraftBedrock::new())
        });
        registry
    }

    pub fn register<F>(&mut self, class_name: &str, constructor: F)
    where
        F: Fn(&VariantContext) -> Arc<dyn GameVariant> + Send + Sync + 'static,
    {
        self.constructors
            .insert(class_name.to_owned(), Box::new(constructor));
    }

    pub fn create(&self, class_name: &str) -> Result<Arc<dyn GameVariant>, OperationError> {
        self.constructors
            .get(class_name)
            .map(|constructor| constructor(&self.context))
            .ok_or_else(|| OperationError::UnknownVariant(class_name.to_owned()))
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
