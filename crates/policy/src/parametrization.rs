//! PolicyParametrization - One policy instance applied to an application

use crate::pointcut::{AlwaysPointcut, PolicyPointcut};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Parameters of an applied policy
#[derive(Debug, Clone)]
pub struct PolicyParametrization {
    /// Unique within the application
    pub id: String,
    pub pointcut: Arc<dyn PolicyPointcut>,
    /// Lower values execute first
    pub order: i32,
    pub parameters: BTreeMap<String, String>,
    /// Policy-specific configuration resource
    pub config_file: Option<PathBuf>,
}

impl PolicyParametrization {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pointcut: Arc::new(AlwaysPointcut),
            order: 0,
            parameters: BTreeMap::new(),
            config_file: None,
        }
    }

    pub fn with_pointcut(mut self, pointcut: Arc<dyn PolicyPointcut>) -> Self {
        self.pointcut = pointcut;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }
}
