//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作

use crate::joinpoint::{JoinPoint, ProceedJoinPoint};
use crate::types::Value;
use std::fmt;
use std::sync::Arc;
use tapestry_core::Result;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::Around => "around",
            AdviceKind::AfterReturning => "afterReturning",
            AdviceKind::AfterThrowing => "afterThrowing",
        };
        f.write_str(name)
    }
}

/// 前置、后置、返回后通知的回调
pub type JoinPointFn = Arc<dyn Fn(&mut JoinPoint) -> Result<()> + Send + Sync>;

/// 环绕通知的回调，返回值成为连接点的新结果
pub type AroundFn = Arc<dyn Fn(&mut ProceedJoinPoint) -> Result<Option<Value>> + Send + Sync>;

/// 异常通知的回调
pub type ThrowingFn = Arc<dyn Fn(&mut JoinPoint, &anyhow::Error) -> Result<()> + Send + Sync>;

/// 通知的执行体
#[derive(Clone)]
pub enum AdviceBody {
    Before(JoinPointFn),
    After(JoinPointFn),
    Around(AroundFn),
    AfterReturning(JoinPointFn),
    AfterThrowing(ThrowingFn),
}

impl AdviceBody {
    pub fn kind(&self) -> AdviceKind {
        match self {
            AdviceBody::Before(_) => AdviceKind::Before,
            AdviceBody::After(_) => AdviceKind::After,
            AdviceBody::Around(_) => AdviceKind::Around,
            AdviceBody::AfterReturning(_) => AdviceKind::AfterReturning,
            AdviceBody::AfterThrowing(_) => AdviceKind::AfterThrowing,
        }
    }
}

/// 一条通知：名称、执行顺序与执行体
///
/// `order` 越大，进入时越先执行，退出时越后执行。
#[derive(Clone)]
pub struct Advice {
    name: Arc<str>,
    order: i32,
    body: AdviceBody,
}

impl Advice {
    pub fn new(name: impl Into<Arc<str>>, order: i32, body: AdviceBody) -> Self {
        Self {
            name: name.into(),
            order,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn kind(&self) -> AdviceKind {
        self.body.kind()
    }

    pub fn body(&self) -> &AdviceBody {
        &self.body
    }

    /// 拆分为按类型存放的通知
    pub(crate) fn split(&self) -> AdviceSlot {
        match &self.body {
            AdviceBody::Before(f) => AdviceSlot::Before(self.advised(Arc::clone(f))),
            AdviceBody::After(f) => AdviceSlot::After(self.advised(Arc::clone(f))),
            AdviceBody::AfterReturning(f) => AdviceSlot::AfterReturning(self.advised(Arc::clone(f))),
            AdviceBody::Around(f) => AdviceSlot::Around(self.advised(Arc::clone(f))),
            AdviceBody::AfterThrowing(f) => AdviceSlot::AfterThrowing(self.advised(Arc::clone(f))),
        }
    }

    fn advised<F>(&self, callback: F) -> Advised<F> {
        Advised {
            name: Arc::clone(&self.name),
            order: self.order,
            callback,
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advice")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("order", &self.order)
            .finish()
    }
}

pub(crate) enum AdviceSlot {
    Before(JoinPointAdvice),
    After(JoinPointAdvice),
    AfterReturning(JoinPointAdvice),
    Around(AroundAdvice),
    AfterThrowing(ThrowingAdvice),
}

/// 已绑定到某个方法上的通知
#[derive(Clone)]
pub struct Advised<F> {
    name: Arc<str>,
    order: i32,
    callback: F,
}

pub type JoinPointAdvice = Advised<JoinPointFn>;
pub type AroundAdvice = Advised<AroundFn>;
pub type ThrowingAdvice = Advised<ThrowingFn>;

impl<F> Advised<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

impl JoinPointAdvice {
    pub fn run(&self, join_point: &mut JoinPoint) -> Result<()> {
        (self.callback)(join_point)
    }
}

impl AroundAdvice {
    pub fn around(&self, join_point: &mut ProceedJoinPoint) -> Result<Option<Value>> {
        (self.callback)(join_point)
    }
}

impl ThrowingAdvice {
    pub fn throwing(&self, join_point: &mut JoinPoint, error: &anyhow::Error) -> Result<()> {
        (self.callback)(join_point, error)
    }
}

impl<F> fmt::Debug for Advised<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.order)
    }
}

/// 追加后按 `order` 降序重新排序
///
/// `sort_by` 是稳定排序，`order` 相同的通知保持注册顺序。
pub(crate) fn insert_ordered<F>(list: &mut Vec<Advised<F>>, advised: Advised<F>) {
    list.push(advised);
    list.sort_by(|a, b| b.order.cmp(&a.order));
}
