//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化：一个切面实例加上一组（切点，顺序，通知类型，
//! 回调）声明。回调以切面实例为第一个参数，由 [`AspectBuilder`] 绑定。

use crate::advice::{Advice, AdviceBody, AdviceKind};
use crate::error_info::ErrorInfo;
use crate::joinpoint::{JoinPoint, ProceedJoinPoint};
use crate::types::Value;
use std::sync::Arc;
use tapestry_core::Result;

/// 一条通知声明
#[derive(Debug, Clone)]
pub struct AdviceDeclaration {
    pub selector: String,
    pub advice: Advice,
}

/// 切面定义
#[derive(Debug, Clone)]
pub struct AspectDefinition {
    name: String,
    advices: Vec<AdviceDeclaration>,
}

impl AspectDefinition {
    /// 以切面实例开始构建定义
    ///
    /// ```ignore
    /// let definition = AspectDefinition::builder("AuditAspect", AuditAspect::default())
    ///     .before("shop.OrderService.place(...)", 10, AuditAspect::record)
    ///     .after_throwing("shop.*.*(...)", 0, AuditAspect::failed)
    ///     .build();
    /// ```
    pub fn builder<A: Send + Sync + 'static>(name: impl Into<String>, instance: A) -> AspectBuilder<A> {
        AspectBuilder {
            name: name.into(),
            instance: Arc::new(instance),
            advices: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按声明顺序排列的通知
    pub fn advices(&self) -> &[AdviceDeclaration] {
        &self.advices
    }

    pub fn len(&self) -> usize {
        self.advices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advices.is_empty()
    }
}

/// [`AspectDefinition`] 构建器
pub struct AspectBuilder<A> {
    name: String,
    instance: Arc<A>,
    advices: Vec<AdviceDeclaration>,
}

impl<A: Send + Sync + 'static> AspectBuilder<A> {
    /// 前置通知
    pub fn before<F>(self, selector: &str, order: i32, callback: F) -> Self
    where
        F: Fn(&A, &mut JoinPoint) -> Result<()> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let body = AdviceBody::Before(Arc::new(move |jp: &mut JoinPoint| callback(&*instance, jp)));
        self.declare(selector, order, body)
    }

    /// 后置通知（无论成功还是失败都执行）
    pub fn after<F>(self, selector: &str, order: i32, callback: F) -> Self
    where
        F: Fn(&A, &mut JoinPoint) -> Result<()> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let body = AdviceBody::After(Arc::new(move |jp: &mut JoinPoint| callback(&*instance, jp)));
        self.declare(selector, order, body)
    }

    /// 返回后通知
    pub fn after_returning<F>(self, selector: &str, order: i32, callback: F) -> Self
    where
        F: Fn(&A, &mut JoinPoint) -> Result<()> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let body =
            AdviceBody::AfterReturning(Arc::new(move |jp: &mut JoinPoint| callback(&*instance, jp)));
        self.declare(selector, order, body)
    }

    /// 环绕通知，返回值成为连接点的结果
    pub fn around<F>(self, selector: &str, order: i32, callback: F) -> Self
    where
        F: Fn(&A, &mut ProceedJoinPoint) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let body =
            AdviceBody::Around(Arc::new(move |jp: &mut ProceedJoinPoint| callback(&*instance, jp)));
        self.declare(selector, order, body)
    }

    /// 异常通知
    ///
    /// 只要方法上绑定了异常通知，原始错误就不会再传播给调用方；
    /// 回调返回的错误会取而代之。
    pub fn after_throwing<F>(self, selector: &str, order: i32, callback: F) -> Self
    where
        F: Fn(&A, &mut JoinPoint, &anyhow::Error) -> Result<()> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let body = AdviceBody::AfterThrowing(Arc::new(
            move |jp: &mut JoinPoint, error: &anyhow::Error| callback(&*instance, jp, error),
        ));
        self.declare(selector, order, body)
    }

    fn declare(mut self, selector: &str, order: i32, body: AdviceBody) -> Self {
        let name = advice_name(&self.name, body.kind(), self.advices.len());
        self.advices.push(AdviceDeclaration {
            selector: selector.to_string(),
            advice: Advice::new(name, order, body),
        });
        self
    }

    pub fn build(self) -> AspectDefinition {
        AspectDefinition {
            name: self.name,
            advices: self.advices,
        }
    }
}

fn advice_name(aspect: &str, kind: AdviceKind, index: usize) -> String {
    format!("{}::{}#{}", aspect, kind, index)
}

/// 能描述自身的切面类型
///
/// 配合 [`register_aspect!`](crate::register_aspect) 可在启动时自动注册。
pub trait Aspect {
    fn definition() -> AspectDefinition;
}

/// 切面注册器
///
/// 用于 inventory 自动收集和注册切面
pub struct AspectRegistration {
    /// 切面名称
    pub name: &'static str,

    /// 创建切面定义的函数
    pub creator: fn() -> AspectDefinition,
}

impl AspectRegistration {
    pub const fn new(name: &'static str, creator: fn() -> AspectDefinition) -> Self {
        Self { name, creator }
    }

    pub fn create_definition(&self) -> AspectDefinition {
        (self.creator)()
    }
}

inventory::collect!(AspectRegistration);

/// 获取所有注册的切面注册器
pub fn registered_aspects() -> impl Iterator<Item = &'static AspectRegistration> {
    inventory::iter::<AspectRegistration>()
}

// ============================================================================
// 预定义的常用切面
// ============================================================================

/// 日志切面 - 记录方法进入与退出
pub struct LoggingAspect {
    selector: String,
    order: i32,
    log_args: bool,
}

impl LoggingAspect {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            order: 0,
            log_args: false,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }

    fn entering(&self, jp: &mut JoinPoint) -> Result<()> {
        if self.log_args {
            tracing::info!(args = jp.args().len(), "→ Entering: {}", jp.signature());
        } else {
            tracing::info!("→ Entering: {}", jp.signature());
        }
        Ok(())
    }

    fn exiting(&self, jp: &mut JoinPoint) -> Result<()> {
        tracing::info!("← Exiting: {} (took {:?})", jp.signature(), jp.elapsed());
        Ok(())
    }

    pub fn definition(self) -> AspectDefinition {
        let selector = self.selector.clone();
        let order = self.order;
        AspectDefinition::builder("LoggingAspect", self)
            .before(&selector, order, Self::entering)
            .after(&selector, order, Self::exiting)
            .build()
    }
}

/// 性能监控切面 - 调用耗时超过阈值时告警
pub struct PerformanceAspect {
    selector: String,
    threshold_ms: u128,
}

impl PerformanceAspect {
    pub fn new(threshold_ms: u128, selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            threshold_ms,
        }
    }

    fn measure(&self, jp: &mut JoinPoint) -> Result<()> {
        let elapsed = jp.elapsed().as_millis();
        if elapsed > self.threshold_ms {
            tracing::warn!(
                elapsed_ms = elapsed as u64,
                threshold_ms = self.threshold_ms as u64,
                "Slow method detected: {}",
                jp.signature()
            );
        }
        Ok(())
    }

    pub fn definition(self) -> AspectDefinition {
        let selector = self.selector.clone();
        // 最低优先级，最先退出，尽量只统计方法本身的耗时
        AspectDefinition::builder("PerformanceAspect", self)
            .after(&selector, i32::MIN, Self::measure)
            .build()
    }
}

/// 错误日志切面 - 记录方法抛出的错误
///
/// 作为异常通知绑定后，被记录的错误不会再传播给调用方。
pub struct ErrorLoggingAspect {
    selector: String,
}

impl ErrorLoggingAspect {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    fn log_error(&self, jp: &mut JoinPoint, error: &anyhow::Error) -> Result<()> {
        let info = ErrorInfo::from_anyhow(error);
        tracing::error!(
            error_type = %info.error_type,
            "Exception in {}: {}",
            jp.signature(),
            info.full_description()
        );
        Ok(())
    }

    pub fn definition(self) -> AspectDefinition {
        let selector = self.selector.clone();
        AspectDefinition::builder("ErrorLoggingAspect", self)
            .after_throwing(&selector, 0, Self::log_error)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        seen: Arc<AtomicUsize>,
    }

    impl Counting {
        fn count(&self, _jp: &mut JoinPoint) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn passthrough(&self, jp: &mut ProceedJoinPoint) -> Result<Option<Value>> {
            jp.proceed()
        }
    }

    #[test]
    fn test_builder_preserves_declaration_order() {
        let definition = AspectDefinition::builder("Counting", Counting::default())
            .before("a.b.C.foo(...)", 5, Counting::count)
            .around("a.b.C.foo(int)", 1, Counting::passthrough)
            .after("a.b.*.bar()", 3, |_: &Counting, _: &mut JoinPoint| Ok(()))
            .build();

        assert_eq!(definition.name(), "Counting");
        assert_eq!(definition.len(), 3);

        let summary: Vec<(&str, AdviceKind, i32)> = definition
            .advices()
            .iter()
            .map(|d| (d.selector.as_str(), d.advice.kind(), d.advice.order()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.b.C.foo(...)", AdviceKind::Before, 5),
                ("a.b.C.foo(int)", AdviceKind::Around, 1),
                ("a.b.*.bar()", AdviceKind::After, 3),
            ]
        );
        assert_eq!(definition.advices()[1].advice.name(), "Counting::around#1");
    }

    #[test]
    fn test_callbacks_share_one_instance() {
        let seen = Arc::new(AtomicUsize::new(0));
        let definition = AspectDefinition::builder("Counting", Counting { seen: Arc::clone(&seen) })
            .before("a.b.C.foo()", 0, Counting::count)
            .after("a.b.C.foo()", 0, Counting::count)
            .build();

        let descriptor = crate::types::TypeDescriptor::concrete("a.b.C", || ())
            .method("foo", &[] as &[&str], |_: &(), _| Ok(Some(value(1u8))))
            .build();
        let method = descriptor.method("foo", &[]).unwrap();
        let mut jp = JoinPoint::new(
            descriptor.instantiate().unwrap(),
            Arc::clone(method.descriptor()),
            Vec::new(),
        );

        for declaration in definition.advices() {
            match declaration.advice.body() {
                AdviceBody::Before(f) | AdviceBody::After(f) => f(&mut jp).unwrap(),
                _ => unreachable!(),
            }
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_builtin_aspects() {
        let logging = LoggingAspect::new("a.b.C.foo(...)").with_order(7).with_args().definition();
        assert_eq!(logging.len(), 2);
        assert!(logging.advices().iter().all(|d| d.advice.order() == 7));

        let perf = PerformanceAspect::new(100, "a.b.*.*(...)").definition();
        assert_eq!(perf.advices()[0].advice.kind(), AdviceKind::After);

        let errors = ErrorLoggingAspect::new("a.b.C.*(...)").definition();
        assert_eq!(errors.advices()[0].advice.kind(), AdviceKind::AfterThrowing);
        assert_eq!(errors.advices()[0].selector, "a.b.C.*(...)");
    }
}
