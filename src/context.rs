//! Analysis session state.
//!
//! A `Context` owns the named layers and catalogs of one session together
//! with its configuration. A `Module` binds one catalog to one layer plus the
//! kernel load offset, and is what OS support code resolves symbols through.

use crate::config::{LayerSpec, SessionConfig};
use crate::error::{Result, StrataError};
use crate::layers::{FileLayer, IntelLayer, Layer, PagingMode, Translation};
use crate::objects::Object;
use crate::symbols::{Catalog, TypeRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Named layers and catalogs shared by every plugin of a session.
#[derive(Debug, Clone, Default)]
pub struct Context {
    layers: BTreeMap<String, Arc<dyn Layer>>,
    catalogs: BTreeMap<String, Arc<Catalog>>,
    config: SessionConfig,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Build every layer and load every catalog the configuration names.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut context = Self::with_config(config.clone());
        for spec in &config.layers {
            let layer: Arc<dyn Layer> = match spec {
                LayerSpec::File { name, path } => Arc::new(FileLayer::open(name.as_str(), path)?),
                LayerSpec::Intel {
                    name,
                    base_layer,
                    dtb,
                    paging_mode,
                } => {
                    let base = Arc::clone(context.layer(base_layer)?);
                    Arc::new(IntelLayer::new(
                        name.as_str(),
                        base,
                        *dtb,
                        PagingMode::from_kind(*paging_mode),
                    ))
                }
            };
            context.add_layer(layer)?;
        }
        for spec in &config.catalogs {
            let catalog = Catalog::load(&spec.locator).map_err(|e| crate::log_error!(e, "Catalog load failed"))?;
            context.add_catalog(&spec.name, catalog)?;
        }
        info!(
            layers = context.layers.len(),
            catalogs = context.catalogs.len(),
            "Session context ready"
        );
        Ok(context)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn add_layer(&mut self, layer: Arc<dyn Layer>) -> Result<()> {
        let name = layer.name().to_string();
        if self.layers.contains_key(&name) {
            return Err(StrataError::DuplicateLayer(name));
        }
        debug!(layer = %name, max = layer.maximum_address(), "Added layer");
        self.layers.insert(name, layer);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Result<&Arc<dyn Layer>> {
        self.layers
            .get(name)
            .ok_or_else(|| StrataError::UnknownLayer(name.to_string()))
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Register a catalog. Type classes must be bound before this call.
    pub fn add_catalog(&mut self, name: &str, catalog: Catalog) -> Result<()> {
        if self.catalogs.contains_key(name) {
            return Err(StrataError::InvalidConfig(format!("catalog {name} already registered")));
        }
        debug!(catalog = name, source = catalog.source().unwrap_or("<memory>"), "Added catalog");
        self.catalogs.insert(name.to_string(), Arc::new(catalog));
        Ok(())
    }

    pub fn catalog(&self, name: &str) -> Result<&Arc<Catalog>> {
        self.catalogs
            .get(name)
            .ok_or_else(|| StrataError::UnknownCatalog(name.to_string()))
    }

    /// Mutable access for late type-class binding. Objects created earlier
    /// keep the catalog they were cast with.
    pub fn catalog_mut(&mut self, name: &str) -> Result<&mut Catalog> {
        self.catalogs
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| StrataError::UnknownCatalog(name.to_string()))
    }

    /// Translate `address` in the named layer after applying its address mask.
    pub fn translate(&self, layer_name: &str, address: u64) -> Result<Translation> {
        let layer = self.layer(layer_name)?;
        layer.translate(address & layer.address_mask())
    }

    /// Cast `type_name` at `offset`. A `catalog!type` name selects the catalog
    /// explicitly; otherwise `catalog_name` is used.
    pub fn object(&self, catalog_name: &str, layer_name: &str, type_name: &str, offset: u64) -> Result<Object> {
        let (catalog_name, type_name) = type_name.split_once('!').unwrap_or((catalog_name, type_name));
        Object::cast(
            Arc::clone(self.layer(layer_name)?),
            offset,
            type_name,
            Arc::clone(self.catalog(catalog_name)?),
        )
    }

    /// A module with no kernel offset applied.
    pub fn module(&self, catalog_name: &str, layer_name: &str) -> Result<Module> {
        Ok(Module::new(
            Arc::clone(self.catalog(catalog_name)?),
            Arc::clone(self.layer(layer_name)?),
        ))
    }
}

/// A catalog bound to a layer at a load offset.
#[derive(Debug, Clone)]
pub struct Module {
    catalog: Arc<Catalog>,
    layer: Arc<dyn Layer>,
    offset: i64,
}

impl Module {
    pub fn new(catalog: Arc<Catalog>, layer: Arc<dyn Layer>) -> Self {
        Self {
            catalog,
            layer,
            offset: 0,
        }
    }

    /// Use `offset` as the load offset. Replaces any previous offset, so
    /// applying the same resolution twice is harmless.
    pub fn with_kernel_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn kernel_offset(&self) -> i64 {
        self.offset
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn layer(&self) -> &Arc<dyn Layer> {
        &self.layer
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.catalog.has_symbol(name)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.catalog.has_type(name)
    }

    pub fn get_type(&self, name: &str) -> Result<TypeRef> {
        self.catalog.type_ref(name)
    }

    /// Runtime address of a symbol: masked static address plus load offset.
    pub fn symbol_address(&self, name: &str) -> Result<u64> {
        let (address, _) = self.catalog.resolve_symbol(name)?;
        let mask = self.layer.address_mask();
        Ok((address & mask).wrapping_add_signed(self.offset) & mask)
    }

    /// The object a typed symbol describes.
    pub fn object_from_symbol(&self, name: &str) -> Result<Object> {
        let symbol = self.catalog.symbol(name)?;
        let type_ref = symbol
            .type_ref
            .clone()
            .ok_or_else(|| StrataError::invalid_type(name, "symbol has no type"))?;
        Ok(Object::new(
            Arc::clone(&self.layer),
            self.symbol_address(name)?,
            type_ref,
            Arc::clone(&self.catalog),
        ))
    }

    /// A symbol's storage cast to an explicit type.
    pub fn object_from_symbol_as(&self, name: &str, type_name: &str) -> Result<Object> {
        self.object(type_name, self.symbol_address(name)?)
    }

    /// Cast `type_name` at an absolute address in the module's layer.
    pub fn object(&self, type_name: &str, address: u64) -> Result<Object> {
        Object::cast(
            Arc::clone(&self.layer),
            address & self.layer.address_mask(),
            type_name,
            Arc::clone(&self.catalog),
        )
    }

    /// An array of `count` `type_name` elements at an absolute address.
    pub fn array(&self, type_name: &str, address: u64, count: u64) -> Result<Object> {
        Ok(Object::array(
            Arc::clone(&self.layer),
            address & self.layer.address_mask(),
            self.catalog.type_ref(type_name)?,
            count,
            Arc::clone(&self.catalog),
        ))
    }
}
