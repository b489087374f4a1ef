//! 类型与方法表
//!
//! Rust 没有运行时反射，也无法动态生成子类。可被织入的类型需要显式
//! 发布自己的方法表：每个方法由所属类型名、方法名、参数类型名和一个
//! 调用原始实现的闭包组成。切点只会与这张表匹配。

use crate::interceptor::{InterceptorMarker, MethodInterceptor};
use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tapestry_core::{Result, WeaveError};

/// 方法参数与返回值
pub type Value = Arc<dyn Any + Send + Sync>;

/// 被调用的目标对象
pub type Target = Arc<dyn Any + Send + Sync>;

/// 调用原始方法实现的函数
pub type Invoker = Arc<dyn Fn(&Target, &[Value]) -> Result<Option<Value>> + Send + Sync>;

type Constructor = Arc<dyn Fn() -> Target + Send + Sync>;

/// 将任意值包装为 [`Value`]
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// 读取第 `index` 个参数
pub fn arg<T: Any>(args: &[Value], index: usize) -> Result<&T> {
    args.get(index)
        .and_then(|v| (**v).downcast_ref::<T>())
        .ok_or_else(|| {
            WeaveError::ArgumentMismatch {
                index,
                expected: type_name::<T>().to_string(),
            }
            .into()
        })
}

/// 将返回值还原为具体类型
pub fn downcast_value<T: Any + Send + Sync>(value: Value) -> Option<Arc<T>> {
    value.downcast::<T>().ok()
}

/// 参数类型名的规范形式：去掉所有空白
///
/// `HashMap<String, u32>` 与 `HashMap<String,u32>` 视为同一类型。
pub fn canonical_param(param: &str) -> String {
    param.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 方法签名
///
/// 形如 `a.b.C.foo(int,java.lang.String)`：所属类型全名 + 方法名 +
/// 按顺序排列的参数类型名，不含修饰符和返回类型。两个方法当且仅当
/// 签名字符串相等时视为同一个方法。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature(Arc<str>);

impl MethodSignature {
    pub fn new<S: AsRef<str>>(owner: &str, name: &str, params: &[S]) -> Self {
        let params: Vec<String> = params.iter().map(|p| canonical_param(p.as_ref())).collect();
        Self(format!("{}.{}({})", owner, name, params.join(",")).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodSignature({})", self.0)
    }
}

/// 方法描述
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    owner: String,
    name: String,
    params: Vec<String>,
    signature: MethodSignature,
}

impl MethodDescriptor {
    pub fn new<S: AsRef<str>>(owner: &str, name: &str, params: &[S]) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| canonical_param(p.as_ref())).collect(),
            signature: MethodSignature::new(owner, name, params),
        }
    }

    /// 声明该方法的类型全名
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }
}

/// 方法表中的一项
#[derive(Clone)]
pub struct MethodHandle {
    descriptor: Arc<MethodDescriptor>,
    invoker: Invoker,
    interceptor: Option<InterceptorMarker>,
}

impl MethodHandle {
    pub fn new(descriptor: MethodDescriptor, invoker: Invoker) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            invoker,
            interceptor: None,
        }
    }

    pub fn descriptor(&self) -> &Arc<MethodDescriptor> {
        &self.descriptor
    }

    pub fn signature(&self) -> &MethodSignature {
        self.descriptor.signature()
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// 标记了单一拦截器的方法返回该拦截器的描述
    pub fn interceptor(&self) -> Option<&InterceptorMarker> {
        self.interceptor.as_ref()
    }

    /// 直接调用原始实现，不经过任何通知
    pub fn invoke(&self, target: &Target, args: &[Value]) -> Result<Option<Value>> {
        (self.invoker)(target, args)
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandle")
            .field("signature", self.signature())
            .field("interceptor", &self.interceptor.as_ref().map(|m| m.type_name()))
            .finish()
    }
}

/// 类型种类：只有具体类型才会被织入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Concrete,
    Abstract,
    Interface,
}

/// 类型描述
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    methods: Vec<MethodHandle>,
    constructor: Option<Constructor>,
}

impl TypeDescriptor {
    /// 具体类型，`constructor` 用于创建织入实例
    pub fn concrete<T, F>(name: impl Into<String>, constructor: F) -> TypeBuilder<T>
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move || Arc::new(constructor()) as Target);
        TypeBuilder::new(name.into(), TypeKind::Concrete, Some(constructor))
    }

    pub fn abstract_type(name: impl Into<String>) -> TypeBuilder<()> {
        TypeBuilder::new(name.into(), TypeKind::Abstract, None)
    }

    pub fn interface(name: impl Into<String>) -> TypeBuilder<()> {
        TypeBuilder::new(name.into(), TypeKind::Interface, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 所在命名空间：`a.b.C` 的命名空间为 `a.b`，顶层类型为空串
    pub fn namespace(&self) -> &str {
        self.name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_concrete(&self) -> bool {
        self.kind == TypeKind::Concrete
    }

    pub fn methods(&self) -> &[MethodHandle] {
        &self.methods
    }

    /// 按方法名和参数类型查找
    pub fn method(&self, name: &str, params: &[&str]) -> Option<&MethodHandle> {
        self.method_by_signature(&MethodSignature::new(&self.name, name, params))
    }

    pub fn method_by_signature(&self, signature: &MethodSignature) -> Option<&MethodHandle> {
        self.methods.iter().find(|m| m.signature() == signature)
    }

    /// 创建一个新的目标对象
    pub fn instantiate(&self) -> Result<Target> {
        match (&self.constructor, self.kind) {
            (Some(constructor), TypeKind::Concrete) => Ok(constructor()),
            _ => Err(WeaveError::TypeNotInstantiable(self.name.clone()).into()),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// [`TypeDescriptor`] 构建器
///
/// ```ignore
/// let descriptor = TypeDescriptor::concrete("shop.OrderService", OrderService::default)
///     .method("place", &["u32"], |svc: &OrderService, args| {
///         let qty = arg::<u32>(args, 0)?;
///         Ok(Some(value(svc.place(*qty))))
///     })
///     .intercepted_by::<AuditInterceptor>()
///     .build();
/// ```
pub struct TypeBuilder<T> {
    name: String,
    kind: TypeKind,
    methods: Vec<MethodHandle>,
    constructor: Option<Constructor>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TypeBuilder<T> {
    fn new(name: String, kind: TypeKind, constructor: Option<Constructor>) -> Self {
        Self {
            name,
            kind,
            methods: Vec::new(),
            constructor,
            _target: PhantomData,
        }
    }

    /// 声明一个方法及其实现
    pub fn method<S, F>(mut self, name: &str, params: &[S], body: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&T, &[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let descriptor = MethodDescriptor::new(&self.name, name, params);
        let signature = descriptor.signature().clone();
        let invoker: Invoker = Arc::new(move |target: &Target, args: &[Value]| {
            let this = (**target).downcast_ref::<T>().ok_or_else(|| {
                WeaveError::TargetTypeMismatch {
                    expected: type_name::<T>().to_string(),
                    signature: signature.to_string(),
                }
            })?;
            body(this, args)
        });
        self.methods.push(MethodHandle::new(descriptor, invoker));
        self
    }

    /// 声明一个没有实现的方法（接口或抽象方法）
    pub fn declare<S: AsRef<str>>(mut self, name: &str, params: &[S]) -> Self {
        let descriptor = MethodDescriptor::new(&self.name, name, params);
        let signature = descriptor.signature().clone();
        let invoker: Invoker = Arc::new(move |_: &Target, _: &[Value]| {
            Err(anyhow::anyhow!("'{}' has no implementation", signature))
        });
        self.methods.push(MethodHandle::new(descriptor, invoker));
        self
    }

    /// 将上一个声明的方法交给拦截器 `I` 处理
    pub fn intercepted_by<I>(mut self) -> Self
    where
        I: MethodInterceptor + Default,
    {
        match self.methods.last_mut() {
            Some(method) => method.interceptor = Some(InterceptorMarker::of::<I>()),
            None => tracing::warn!(
                owner = %self.name,
                interceptor = type_name::<I>(),
                "intercepted_by called before any method was declared"
            ),
        }
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name,
            kind: self.kind,
            methods: self.methods,
            constructor: self.constructor,
        }
    }
}
