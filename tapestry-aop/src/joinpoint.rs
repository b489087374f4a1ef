//! 连接点（JoinPoint）定义
//!
//! 连接点描述一次被拦截的方法调用。同一次调用中的所有通知共享同一个
//! 连接点，字段会随执行进度原地更新；连接点不会跨调用复用。

use crate::types::{Invoker, MethodDescriptor, MethodHandle, MethodSignature, Target, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapestry_core::Result;

/// 连接点信息
pub struct JoinPoint {
    /// 被织入的目标对象
    target: Target,

    /// 被拦截的方法
    method: Arc<MethodDescriptor>,

    args: Vec<Value>,

    /// 方法执行结果，设置前为 `None`
    result: Option<Value>,

    /// 通知之间传递数据用的参数表，首次写入时创建
    params: Option<HashMap<String, Value>>,

    /// 进入拦截运行时的时间
    started_at: Instant,
}

impl JoinPoint {
    pub fn new(target: Target, method: Arc<MethodDescriptor>, args: Vec<Value>) -> Self {
        Self {
            target,
            method,
            args,
            result: None,
            params: None,
            started_at: Instant::now(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// 将目标对象还原为具体类型
    pub fn target_as<T: Any>(&self) -> Option<&T> {
        (*self.target).downcast_ref::<T>()
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn signature(&self) -> &MethodSignature {
        self.method.signature()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// 通知可以在方法执行前改写参数
    pub fn args_mut(&mut self) -> &mut Vec<Value> {
        &mut self.args
    }

    pub fn arg<T: Any>(&self, index: usize) -> Option<&T> {
        self.args.get(index).and_then(|v| (**v).downcast_ref::<T>())
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn result_as<T: Any>(&self) -> Option<&T> {
        self.result.as_ref().and_then(|v| (**v).downcast_ref::<T>())
    }

    pub fn set_result(&mut self, result: Option<Value>) {
        self.result = result;
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// 写入参数键值对
    pub fn set_param(&mut self, name: impl Into<String>, value: Value) {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value);
    }

    /// 获得参数值
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    pub fn param_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.param(name).and_then(|v| (**v).downcast_ref::<T>())
    }

    /// 自进入拦截运行时以来经过的时间
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", self.signature())
            .field("args", &self.args.len())
            .field("has_result", &self.result.is_some())
            .field(
                "params",
                &self.params.as_ref().map(|p| p.keys().collect::<Vec<_>>()),
            )
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

/// 可继续执行的连接点
///
/// 环绕通知与拦截器通过 [`proceed`](Self::proceed) 调用原始方法实现。
/// `proceed` 可以调用多次，每次都会执行一次原始方法。
pub struct ProceedJoinPoint {
    join_point: JoinPoint,
    invoker: Invoker,
}

impl ProceedJoinPoint {
    pub fn new(target: Target, method: &MethodHandle, args: Vec<Value>) -> Self {
        Self {
            join_point: JoinPoint::new(target, Arc::clone(method.descriptor()), args),
            invoker: Arc::clone(method.invoker()),
        }
    }

    /// 以当前参数执行原始方法，返回其结果或错误
    ///
    /// 不会修改连接点的 `result`。
    pub fn proceed(&self) -> Result<Option<Value>> {
        (self.invoker)(&self.join_point.target, &self.join_point.args)
    }

    pub fn join_point(&self) -> &JoinPoint {
        &self.join_point
    }

    pub fn into_join_point(self) -> JoinPoint {
        self.join_point
    }
}

impl Deref for ProceedJoinPoint {
    type Target = JoinPoint;

    fn deref(&self) -> &JoinPoint {
        &self.join_point
    }
}

impl DerefMut for ProceedJoinPoint {
    fn deref_mut(&mut self) -> &mut JoinPoint {
        &mut self.join_point
    }
}

impl fmt::Debug for ProceedJoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedJoinPoint")
            .field("join_point", &self.join_point)
            .finish()
    }
}
