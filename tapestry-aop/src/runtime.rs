//! 拦截运行时
//!
//! 织入实例上的每次调用都经过 [`CallDispatcher`]。通知按洋葱模型执行：
//!
//! 1. Before：`order` 从高到低，失败立即返回，后续阶段都不执行
//! 2. 受保护区：Around 从高到低依次执行（没有 Around 时直接调用原始方法），
//!    成功后 AfterReturning 从低到高执行
//! 3. 受保护区失败：有 AfterThrowing 时从高到低执行并吞掉错误，否则保留错误
//! 4. After：无论成功失败都执行，`order` 从低到高
//! 5. 返回连接点上的结果，或保留下来的错误

use crate::joinpoint::ProceedJoinPoint;
use crate::registry::{AdviceRegistry, AdviceSet};
use crate::types::{MethodHandle, MethodSignature, Target, TypeDescriptor, Value};
use std::fmt;
use std::sync::Arc;
use tapestry_core::{Result, WeaveError};

/// 织入实例的方法调用分发
pub trait CallDispatcher: Send + Sync {
    fn dispatch(&self, target: &Target, method: &MethodHandle, args: Vec<Value>) -> Result<Option<Value>>;
}

/// 按通知注册表分发调用
pub struct AdviceDispatcher {
    registry: Arc<AdviceRegistry>,
}

impl AdviceDispatcher {
    pub fn new(registry: Arc<AdviceRegistry>) -> Self {
        Self { registry }
    }

    fn invoke_guarded(set: &AdviceSet, join_point: &mut ProceedJoinPoint) -> Result<()> {
        if set.around().is_empty() {
            let result = join_point.proceed()?;
            join_point.set_result(result);
        } else {
            for advice in set.around() {
                tracing::trace!(advice = advice.name(), order = advice.order(), "around");
                let result = advice.around(join_point)?;
                join_point.set_result(result);
            }
        }

        for advice in set.after_returning().iter().rev() {
            tracing::trace!(advice = advice.name(), order = advice.order(), "afterReturning");
            advice.run(join_point)?;
        }
        Ok(())
    }

    /// 返回仍需向调用方传播的错误
    fn handle_failure(
        set: &AdviceSet,
        join_point: &mut ProceedJoinPoint,
        error: anyhow::Error,
    ) -> Option<anyhow::Error> {
        if set.after_throwing().is_empty() {
            return Some(error);
        }

        for advice in set.after_throwing() {
            tracing::trace!(advice = advice.name(), order = advice.order(), "afterThrowing");
            if let Err(raised) = advice.throwing(join_point, &error) {
                return Some(raised);
            }
        }
        None
    }
}

impl CallDispatcher for AdviceDispatcher {
    fn dispatch(&self, target: &Target, method: &MethodHandle, args: Vec<Value>) -> Result<Option<Value>> {
        let Some(set) = self.registry.advice_set(method.signature()) else {
            return method.invoke(target, &args);
        };

        tracing::trace!(signature = %method.signature(), advices = set.len(), "Dispatching through advices");
        let mut join_point = ProceedJoinPoint::new(Arc::clone(target), method, args);

        for advice in set.before() {
            tracing::trace!(advice = advice.name(), order = advice.order(), "before");
            advice.run(&mut join_point)?;
        }

        let pending = match Self::invoke_guarded(&set, &mut join_point) {
            Ok(()) => None,
            Err(error) => Self::handle_failure(&set, &mut join_point, error),
        };

        for advice in set.after().iter().rev() {
            tracing::trace!(advice = advice.name(), order = advice.order(), "after");
            advice.run(&mut join_point)?;
        }

        match pending {
            Some(error) => Err(error),
            None => Ok(join_point.take_result()),
        }
    }
}

/// 织入后的实例
///
/// 持有目标对象和分发器，按方法签名调用时会经过通知或拦截器。
#[derive(Clone)]
pub struct WovenInstance {
    ty: Arc<TypeDescriptor>,
    target: Target,
    dispatcher: Arc<dyn CallDispatcher>,
}

impl WovenInstance {
    pub fn new(ty: Arc<TypeDescriptor>, target: Target, dispatcher: Arc<dyn CallDispatcher>) -> Self {
        Self { ty, target, dispatcher }
    }

    /// 按方法名和参数类型调用
    pub fn invoke(&self, name: &str, params: &[&str], args: Vec<Value>) -> Result<Option<Value>> {
        let signature = MethodSignature::new(self.ty.name(), name, params);
        self.invoke_signature(&signature, args)
    }

    pub fn invoke_signature(&self, signature: &MethodSignature, args: Vec<Value>) -> Result<Option<Value>> {
        let method = self.ty.method_by_signature(signature).ok_or_else(|| WeaveError::MethodNotFound {
            type_name: self.ty.name().to_string(),
            signature: signature.to_string(),
        })?;
        self.dispatcher.dispatch(&self.target, method, args)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn target_as<T: std::any::Any>(&self) -> Option<&T> {
        (*self.target).downcast_ref::<T>()
    }

    pub fn type_descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }
}

impl fmt::Debug for WovenInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WovenInstance")
            .field("type", &self.ty.name())
            .finish()
    }
}
