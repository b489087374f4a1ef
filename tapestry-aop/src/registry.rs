//! 通知注册表
//!
//! 方法签名到 [`AdviceSet`] 的映射。写入时复制：调用方拿到的是某一时刻
//! 的快照，执行通知期间不持有任何锁。

use crate::advice::{
    insert_ordered, Advice, AdviceSlot, AroundAdvice, JoinPointAdvice, ThrowingAdvice,
};
use crate::pointcut::MatchedMethod;
use crate::types::MethodSignature;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// 某个方法上绑定的所有通知，每种类型各自按 `order` 降序排列
#[derive(Clone, Default)]
pub struct AdviceSet {
    before: Vec<JoinPointAdvice>,
    after: Vec<JoinPointAdvice>,
    around: Vec<AroundAdvice>,
    after_returning: Vec<JoinPointAdvice>,
    after_throwing: Vec<ThrowingAdvice>,
}

impl AdviceSet {
    pub fn before(&self) -> &[JoinPointAdvice] {
        &self.before
    }

    pub fn after(&self) -> &[JoinPointAdvice] {
        &self.after
    }

    pub fn around(&self) -> &[AroundAdvice] {
        &self.around
    }

    pub fn after_returning(&self) -> &[JoinPointAdvice] {
        &self.after_returning
    }

    pub fn after_throwing(&self) -> &[ThrowingAdvice] {
        &self.after_throwing
    }

    /// 追加通知，只对其所属类型的列表重新排序
    pub fn push(&mut self, advice: &Advice) {
        match advice.split() {
            AdviceSlot::Before(a) => insert_ordered(&mut self.before, a),
            AdviceSlot::After(a) => insert_ordered(&mut self.after, a),
            AdviceSlot::AfterReturning(a) => insert_ordered(&mut self.after_returning, a),
            AdviceSlot::Around(a) => insert_ordered(&mut self.around, a),
            AdviceSlot::AfterThrowing(a) => insert_ordered(&mut self.after_throwing, a),
        }
    }

    pub fn len(&self) -> usize {
        self.before.len()
            + self.after.len()
            + self.around.len()
            + self.after_returning.len()
            + self.after_throwing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AdviceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceSet")
            .field("before", &self.before)
            .field("after", &self.after)
            .field("around", &self.around)
            .field("after_returning", &self.after_returning)
            .field("after_throwing", &self.after_throwing)
            .finish()
    }
}

/// 通知注册表
#[derive(Default)]
pub struct AdviceRegistry {
    advice_sets: RwLock<HashMap<MethodSignature, Arc<AdviceSet>>>,
    woven_types: RwLock<HashSet<String>>,
}

impl AdviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将通知绑定到切点选出的所有方法上，返回绑定数量
    ///
    /// 重复绑定同一条通知会追加而不是替换。
    pub fn bind(&self, methods: &[MatchedMethod], advice: &Advice) -> usize {
        if methods.is_empty() {
            return 0;
        }

        {
            let mut sets = self.advice_sets.write();
            for matched in methods {
                let signature = matched.method.signature();
                let set = sets.entry(signature.clone()).or_default();
                Arc::make_mut(set).push(advice);
                tracing::debug!(
                    signature = %signature,
                    advice = advice.name(),
                    kind = %advice.kind(),
                    order = advice.order(),
                    "Bound advice"
                );
            }
        }

        let mut woven = self.woven_types.write();
        for matched in methods {
            woven.insert(matched.declaring_type.name().to_string());
        }
        methods.len()
    }

    /// 方法当前的通知快照
    pub fn advice_set(&self, signature: &MethodSignature) -> Option<Arc<AdviceSet>> {
        self.advice_sets.read().get(signature).cloned()
    }

    /// 类型是否有方法被通知绑定
    pub fn needs_weaving(&self, type_name: &str) -> bool {
        self.woven_types.read().contains(type_name)
    }

    /// 已绑定通知的方法数量
    pub fn len(&self) -> usize {
        self.advice_sets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
