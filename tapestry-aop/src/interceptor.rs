//! 单一拦截器
//!
//! 在类型的方法表中标记了拦截器的方法，调用时直接交给拦截器处理：
//! 拦截器自行决定是否调用 `proceed()` 以及返回什么，不经过通知链。

use crate::joinpoint::ProceedJoinPoint;
use crate::runtime::CallDispatcher;
use crate::types::{MethodHandle, MethodSignature, Target, Value};
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tapestry_core::Result;

/// 方法拦截器
pub trait MethodInterceptor: Send + Sync + 'static {
    fn intercept(&self, join_point: &mut ProceedJoinPoint) -> Result<Option<Value>>;

    /// 拦截器名称，默认为实现类型名
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

fn create_interceptor<I: MethodInterceptor + Default>() -> Arc<dyn MethodInterceptor> {
    Arc::new(I::default())
}

/// 方法表中记录的拦截器实现类型
#[derive(Clone, Copy)]
pub struct InterceptorMarker {
    type_id: TypeId,
    type_name: &'static str,
    create: fn() -> Arc<dyn MethodInterceptor>,
}

impl InterceptorMarker {
    pub fn of<I: MethodInterceptor + Default>() -> Self {
        Self {
            type_id: TypeId::of::<I>(),
            type_name: type_name::<I>(),
            create: create_interceptor::<I>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for InterceptorMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptorMarker({})", self.type_name)
    }
}

/// 拦截器注册表
///
/// 每个拦截器实现类型只创建一个实例，被所有方法和目标对象共享。
#[derive(Default)]
pub struct InterceptorRegistry {
    singletons: RwLock<HashMap<TypeId, Arc<dyn MethodInterceptor>>>,
    bindings: RwLock<HashMap<MethodSignature, Arc<dyn MethodInterceptor>>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（必要时创建）拦截器单例
    pub fn interceptor(&self, marker: &InterceptorMarker) -> Arc<dyn MethodInterceptor> {
        if let Some(existing) = self.singletons.read().get(&marker.type_id) {
            return Arc::clone(existing);
        }

        let mut singletons = self.singletons.write();
        let interceptor = singletons.entry(marker.type_id).or_insert_with(|| {
            tracing::debug!(interceptor = marker.type_name, "Created interceptor singleton");
            (marker.create)()
        });
        Arc::clone(interceptor)
    }

    /// 将方法绑定到拦截器
    pub fn bind(&self, signature: MethodSignature, marker: &InterceptorMarker) {
        let interceptor = self.interceptor(marker);
        tracing::debug!(
            signature = %signature,
            interceptor = marker.type_name,
            "Bound interceptor"
        );
        self.bindings.write().insert(signature, interceptor);
    }

    pub fn binding(&self, signature: &MethodSignature) -> Option<Arc<dyn MethodInterceptor>> {
        self.bindings.read().get(signature).cloned()
    }

    /// 已创建的单例数量
    pub fn singleton_count(&self) -> usize {
        self.singletons.read().len()
    }
}

/// 按拦截器绑定分发调用
pub struct InterceptDispatcher {
    registry: Arc<InterceptorRegistry>,
}

impl InterceptDispatcher {
    pub fn new(registry: Arc<InterceptorRegistry>) -> Self {
        Self { registry }
    }
}

impl CallDispatcher for InterceptDispatcher {
    fn dispatch(&self, target: &Target, method: &MethodHandle, args: Vec<Value>) -> Result<Option<Value>> {
        let Some(interceptor) = self.registry.binding(method.signature()) else {
            return method.invoke(target, &args);
        };

        tracing::trace!(
            signature = %method.signature(),
            interceptor = interceptor.name(),
            "Dispatching to interceptor"
        );
        let mut join_point = ProceedJoinPoint::new(Arc::clone(target), method, args);
        interceptor.intercept(&mut join_point)
    }
}
