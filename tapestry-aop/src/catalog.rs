//! 类型目录
//!
//! 提供切点解析所需的两个查询：按全名查找类型、按命名空间列出类型。

use crate::types::TypeDescriptor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 类型发现接口
pub trait TypeResolver: Send + Sync {
    /// 按全名查找类型，找不到时返回 `None`
    fn resolve_type(&self, name: &str) -> Option<Arc<TypeDescriptor>>;

    /// 列出命名空间下的所有类型（不含子命名空间）
    fn scan_namespace(&self, namespace: &str) -> Vec<Arc<TypeDescriptor>>;
}

#[derive(Default)]
struct CatalogInner {
    by_name: HashMap<String, Arc<TypeDescriptor>>,
    by_namespace: HashMap<String, Vec<Arc<TypeDescriptor>>>,
}

/// 内存中的类型目录
///
/// 可在运行期间继续注册类型（例如插件加载），读写互不阻塞太久。
#[derive(Default)]
pub struct TypeCatalog {
    inner: RwLock<CatalogInner>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类型；同名类型会被替换
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        let name = descriptor.name().to_string();
        let namespace = descriptor.namespace().to_string();

        let mut inner = self.inner.write();
        let replaced = inner
            .by_name
            .insert(name.clone(), Arc::clone(&descriptor))
            .is_some();

        let types = inner.by_namespace.entry(namespace).or_default();
        match types.iter().position(|t| t.name() == name) {
            Some(index) => types[index] = Arc::clone(&descriptor),
            None => types.push(Arc::clone(&descriptor)),
        }
        drop(inner);

        tracing::debug!(
            type_name = %name,
            methods = descriptor.methods().len(),
            replaced,
            "Registered type"
        );
        descriptor
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeResolver for TypeCatalog {
    fn resolve_type(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.inner.read().by_name.get(name).cloned()
    }

    fn scan_namespace(&self, namespace: &str) -> Vec<Arc<TypeDescriptor>> {
        self.inner
            .read()
            .by_namespace
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

/// 类型注册器
///
/// 用于 inventory 自动收集可织入的类型，见 [`register_type!`](crate::register_type)。
pub struct TypeRegistration {
    pub name: &'static str,
    pub describe: fn() -> TypeDescriptor,
}

impl TypeRegistration {
    pub const fn new(name: &'static str, describe: fn() -> TypeDescriptor) -> Self {
        Self { name, describe }
    }
}

inventory::collect!(TypeRegistration);

/// 获取所有通过 inventory 注册的类型
pub fn registered_types() -> impl Iterator<Item = &'static TypeRegistration> {
    inventory::iter::<TypeRegistration>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(name: &str) -> TypeDescriptor {
        TypeDescriptor::concrete(name, || ()).build()
    }

    #[test]
    fn test_resolve_and_scan() {
        let catalog = TypeCatalog::new();
        catalog.register(empty("a.b.First"));
        catalog.register(empty("a.b.Second"));
        catalog.register(empty("a.b.c.Nested"));
        catalog.register(empty("TopLevel"));

        assert!(catalog.resolve_type("a.b.First").is_some());
        assert!(catalog.resolve_type("a.b.Missing").is_none());

        let names: Vec<String> = catalog
            .scan_namespace("a.b")
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.b.First", "a.b.Second"]);

        assert_eq!(catalog.scan_namespace("").len(), 1);
        assert!(catalog.scan_namespace("x.y").is_empty());
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_reregistration_replaces_in_place() {
        let catalog = TypeCatalog::new();
        catalog.register(empty("a.b.First"));
        catalog.register(empty("a.b.Second"));
        catalog.register(
            TypeDescriptor::concrete("a.b.First", || ())
                .method("ping", &[] as &[&str], |_: &(), _| Ok(None))
                .build(),
        );

        let scanned = catalog.scan_namespace("a.b");
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].name(), "a.b.First");
        assert_eq!(scanned[0].methods().len(), 1);
        assert_eq!(catalog.len(), 2);
    }
}
