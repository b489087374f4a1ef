//! 织入器
//!
//! 对外的门面：注册类型、注册切面、注册拦截目标、创建织入实例。
//! 一个类型要么经由切面织入（[`AdviceDispatcher`]），要么经由单一拦截器
//! 织入（[`InterceptDispatcher`]）。

use crate::aspect::{registered_aspects, AspectDefinition};
use crate::catalog::{registered_types, TypeCatalog, TypeResolver};
use crate::interceptor::{InterceptDispatcher, InterceptorRegistry};
use crate::pointcut::{MatchedMethod, Pointcut};
use crate::registry::{AdviceRegistry, AdviceSet};
use crate::runtime::{AdviceDispatcher, CallDispatcher, WovenInstance};
use crate::types::{MethodSignature, Target, TypeDescriptor};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tapestry_core::{Result, TapestryConfig, WeaveError, WeaveResult, WeaverConfig};

/// 全局织入器
///
/// 首次访问时按 `TAPESTRY_CONFIG` 指定的配置创建，`auto_load` 开启时
/// 加载所有通过 inventory 注册的类型和切面。
static GLOBAL_WEAVER: Lazy<Arc<Weaver>> = Lazy::new(|| {
    let config = TapestryConfig::from_env_or_default()
        .map(|c| c.weaver)
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default weaver configuration: {}", e);
            WeaverConfig::default()
        });

    let weaver = Weaver::new(config);
    if weaver.config().auto_load {
        if let Err(e) = weaver.load_registered() {
            tracing::error!("Failed to load registered aspects: {:#}", e);
        }
    }
    Arc::new(weaver)
});

/// 获取全局织入器
///
/// 使用示例：
/// ```ignore
/// use tapestry_aop::global_weaver;
///
/// let order_service = global_weaver().create_woven_instance("shop.OrderService")?;
/// ```
pub fn global_weaver() -> &'static Arc<Weaver> {
    &GLOBAL_WEAVER
}

/// 对象创建设施依赖的织入接口
pub trait InstanceWeaver: Send + Sync {
    /// 类型是否需要以织入实例的方式创建
    fn is_woven(&self, type_name: &str) -> bool;

    /// 注册切面，返回（方法，通知）绑定数量
    fn register_aspect(&self, aspect: AspectDefinition) -> Result<usize>;

    /// 将类型上标记了拦截器的方法绑定到拦截器，返回绑定数量
    fn register_intercept_target(&self, type_name: &str) -> Result<usize>;

    /// 类型未织入时返回 `None`
    fn create_woven_instance(&self, type_name: &str) -> Result<Option<WovenInstance>>;
}

/// 织入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaveMode {
    Aspects,
    Intercepts,
}

/// 类型的织入登记
pub struct WeavingRegistration {
    ty: Arc<TypeDescriptor>,
    mode: WeaveMode,
    dispatcher: Arc<dyn CallDispatcher>,
}

impl WeavingRegistration {
    pub fn type_descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    pub fn mode(&self) -> WeaveMode {
        self.mode
    }

    /// 创建新的目标对象并织入
    pub fn create(&self) -> Result<WovenInstance> {
        let target = self.ty.instantiate()?;
        Ok(self.weave(target))
    }

    /// 织入已有的目标对象
    pub fn weave(&self, target: Target) -> WovenInstance {
        WovenInstance::new(Arc::clone(&self.ty), target, Arc::clone(&self.dispatcher))
    }
}

/// 织入器
pub struct Weaver {
    config: WeaverConfig,
    catalog: Arc<TypeCatalog>,
    advices: Arc<AdviceRegistry>,
    interceptors: Arc<InterceptorRegistry>,
    registrations: RwLock<HashMap<String, Arc<WeavingRegistration>>>,
    advice_dispatcher: Arc<dyn CallDispatcher>,
    intercept_dispatcher: Arc<dyn CallDispatcher>,
}

impl Weaver {
    pub fn new(config: WeaverConfig) -> Self {
        Self::with_catalog(config, Arc::new(TypeCatalog::new()))
    }

    /// 使用外部共享的类型目录
    pub fn with_catalog(config: WeaverConfig, catalog: Arc<TypeCatalog>) -> Self {
        let advices = Arc::new(AdviceRegistry::new());
        let interceptors = Arc::new(InterceptorRegistry::new());
        Self {
            config,
            catalog,
            advice_dispatcher: Arc::new(AdviceDispatcher::new(Arc::clone(&advices))),
            intercept_dispatcher: Arc::new(InterceptDispatcher::new(Arc::clone(&interceptors))),
            advices,
            interceptors,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn interceptors(&self) -> &Arc<InterceptorRegistry> {
        &self.interceptors
    }

    /// 注册类型
    ///
    /// 同名类型已织入时，织入登记改为指向新的描述。
    pub fn register_type(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let ty = self.catalog.register(descriptor);
        if let Some(registration) = self.registrations.write().get_mut(ty.name()) {
            *registration = Arc::new(WeavingRegistration {
                ty: Arc::clone(&ty),
                mode: registration.mode,
                dispatcher: Arc::clone(&registration.dispatcher),
            });
        }
        ty
    }

    /// 注册切面
    ///
    /// 所有切点先编译，任何一个格式错误都会使整个切面注册失败且不产生任何绑定。
    /// 重复注册同一切面会追加通知。
    pub fn register_aspect(&self, aspect: AspectDefinition) -> Result<usize> {
        let compiled = aspect
            .advices()
            .iter()
            .map(|declaration| Pointcut::compile(&declaration.selector))
            .collect::<WeaveResult<Vec<_>>>()?;

        let mut bound = 0;
        for (pointcut, declaration) in compiled.iter().zip(aspect.advices()) {
            let matched = self.select(pointcut);
            if matched.is_empty() {
                if self.config.warn_unmatched_selectors {
                    tracing::warn!(
                        aspect = aspect.name(),
                        selector = pointcut.selector(),
                        "Selector matched no method"
                    );
                }
                continue;
            }

            bound += self.advices.bind(&matched, &declaration.advice);
            for method in &matched {
                self.mark_aspect_target(&method.declaring_type);
            }
        }

        tracing::info!(aspect = aspect.name(), advices = aspect.len(), bound, "Registered aspect");
        Ok(bound)
    }

    fn select(&self, pointcut: &Pointcut) -> Vec<MatchedMethod> {
        pointcut
            .select(self.catalog.as_ref())
            .into_iter()
            .filter(|m| {
                let excluded = self.config.is_excluded(m.declaring_type.name());
                if excluded {
                    tracing::debug!(
                        signature = %m.method.signature(),
                        "Skipping method in excluded namespace"
                    );
                }
                !excluded
            })
            .collect()
    }

    fn mark_aspect_target(&self, ty: &Arc<TypeDescriptor>) {
        let mut registrations = self.registrations.write();
        match registrations.get(ty.name()).map(|r| r.mode) {
            Some(WeaveMode::Aspects) => return,
            Some(WeaveMode::Intercepts) => tracing::warn!(
                type_name = ty.name(),
                "Type was woven for interceptors, switching to aspect dispatch"
            ),
            None => {}
        }
        registrations.insert(
            ty.name().to_string(),
            Arc::new(WeavingRegistration {
                ty: Arc::clone(ty),
                mode: WeaveMode::Aspects,
                dispatcher: Arc::clone(&self.advice_dispatcher),
            }),
        );
    }

    /// 注册拦截目标
    ///
    /// 类型已织入、不是具体类型、位于排除的命名空间或没有标记拦截器的方法时返回 0。
    pub fn register_intercept_target(&self, type_name: &str) -> Result<usize> {
        let ty = self
            .catalog
            .resolve_type(type_name)
            .ok_or_else(|| WeaveError::TypeNotFound(type_name.to_string()))?;

        if !ty.is_concrete() || self.config.is_excluded(ty.name()) || self.is_woven(ty.name()) {
            tracing::debug!(type_name, "Skipping intercept target");
            return Ok(0);
        }

        let mut bound = 0;
        for method in ty.methods() {
            if let Some(marker) = method.interceptor() {
                self.interceptors.bind(method.signature().clone(), marker);
                bound += 1;
            }
        }
        if bound == 0 {
            return Ok(0);
        }

        self.registrations.write().entry(ty.name().to_string()).or_insert_with(|| {
            Arc::new(WeavingRegistration {
                ty: Arc::clone(&ty),
                mode: WeaveMode::Intercepts,
                dispatcher: Arc::clone(&self.intercept_dispatcher),
            })
        });
        tracing::debug!(type_name, bound, "Registered intercept target");
        Ok(bound)
    }

    pub fn is_woven(&self, type_name: &str) -> bool {
        self.registrations.read().contains_key(type_name)
    }

    pub fn registration(&self, type_name: &str) -> Option<Arc<WeavingRegistration>> {
        self.registrations.read().get(type_name).cloned()
    }

    /// 创建织入实例，类型未织入时返回 `None`
    pub fn create_woven_instance(&self, type_name: &str) -> Result<Option<WovenInstance>> {
        match self.registration(type_name) {
            Some(registration) => Ok(Some(registration.create()?)),
            None => Ok(None),
        }
    }

    /// 织入由调用方创建的目标对象，类型未织入时返回 `None`
    pub fn weave_instance(&self, type_name: &str, target: Target) -> Option<WovenInstance> {
        self.registration(type_name).map(|r| r.weave(target))
    }

    /// 方法当前绑定的通知
    pub fn advice_set(&self, signature: &MethodSignature) -> Option<Arc<AdviceSet>> {
        self.advices.advice_set(signature)
    }

    /// 加载所有通过 inventory 注册的类型与切面
    ///
    /// 先注册类型并绑定其中标记的拦截器，再注册切面。返回加载的切面数量。
    pub fn load_registered(&self) -> Result<usize> {
        let mut types = Vec::new();
        for registration in registered_types() {
            tracing::debug!("  ├─ Loading type: {}", registration.name);
            types.push(self.register_type((registration.describe)()));
        }
        for ty in &types {
            if ty.methods().iter().any(|m| m.interceptor().is_some()) {
                self.register_intercept_target(ty.name())?;
            }
        }

        let aspects: Vec<_> = registered_aspects().collect();
        tracing::info!("Auto-loading {} aspect(s) from registry", aspects.len());
        for registration in &aspects {
            tracing::debug!("  ├─ Loading aspect: {}", registration.name);
            self.register_aspect(registration.create_definition())?;
        }

        tracing::info!(
            types = types.len(),
            aspects = aspects.len(),
            woven = self.registrations.read().len(),
            "Loaded registered types and aspects"
        );
        Ok(aspects.len())
    }
}

impl Default for Weaver {
    fn default() -> Self {
        Self::new(WeaverConfig::default())
    }
}

impl InstanceWeaver for Weaver {
    fn is_woven(&self, type_name: &str) -> bool {
        Weaver::is_woven(self, type_name)
    }

    fn register_aspect(&self, aspect: AspectDefinition) -> Result<usize> {
        Weaver::register_aspect(self, aspect)
    }

    fn register_intercept_target(&self, type_name: &str) -> Result<usize> {
        Weaver::register_intercept_target(self, type_name)
    }

    fn create_woven_instance(&self, type_name: &str) -> Result<Option<WovenInstance>> {
        Weaver::create_woven_instance(self, type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::MethodInterceptor;
    use crate::joinpoint::{JoinPoint, ProceedJoinPoint};
    use crate::types::{arg, value, Value};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Account {
        log: Mutex<Vec<String>>,
    }

    #[derive(Default)]
    struct Audit;

    impl MethodInterceptor for Audit {
        fn intercept(&self, join_point: &mut ProceedJoinPoint) -> Result<Option<Value>> {
            if let Some(account) = join_point.target_as::<Account>() {
                account.log.lock().push("audit".to_string());
            }
            join_point.proceed()
        }
    }

    fn account_type(name: &str) -> TypeDescriptor {
        TypeDescriptor::concrete(name, Account::default)
            .method("deposit", &["int"], |a: &Account, args| {
                let amount = arg::<i32>(args, 0)?;
                a.log.lock().push(format!("deposit {}", amount));
                Ok(Some(value(*amount)))
            })
            .intercepted_by::<Audit>()
            .method("deposit", &[] as &[&str], |a: &Account, _| {
                a.log.lock().push("deposit".to_string());
                Ok(None)
            })
            .build()
    }

    fn weaver() -> Weaver {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let weaver = Weaver::default();
        weaver.register_type(account_type("bank.Account"));
        weaver.register_type(TypeDescriptor::interface("bank.Ledger").declare("deposit", &["int"]).build());
        weaver
    }

    #[derive(Default)]
    struct Tracker {
        seen: Mutex<Vec<String>>,
    }

    fn tracking_aspect(tracker: Arc<Tracker>) -> AspectDefinition {
        let first = Arc::clone(&tracker);
        let second = tracker;
        AspectDefinition::builder("Tracking", ())
            .before("bank.Account.deposit(...)", 1, move |_: &(), _: &mut JoinPoint| {
                first.seen.lock().push("before-1".to_string());
                Ok(())
            })
            .before("bank.Account.deposit(int)", 2, move |_: &(), _: &mut JoinPoint| {
                second.seen.lock().push("before-2".to_string());
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_aspect_scenario_runs_before_advices_in_order() {
        let weaver = weaver();
        let tracker = Arc::new(Tracker::default());
        assert_eq!(weaver.register_aspect(tracking_aspect(Arc::clone(&tracker))).unwrap(), 3);
        assert!(weaver.is_woven("bank.Account"));
        assert!(!weaver.is_woven("bank.Ledger"));

        let account = weaver.create_woven_instance("bank.Account").unwrap().unwrap();
        account.invoke("deposit", &["int"], vec![value(42i32)]).unwrap();

        assert_eq!(*tracker.seen.lock(), vec!["before-2", "before-1"]);
        assert_eq!(*account.target_as::<Account>().unwrap().log.lock(), vec!["deposit 42"]);
    }

    #[test]
    fn test_registering_twice_appends() {
        let weaver = weaver();
        let tracker = Arc::new(Tracker::default());
        weaver.register_aspect(tracking_aspect(Arc::clone(&tracker))).unwrap();
        weaver.register_aspect(tracking_aspect(Arc::clone(&tracker))).unwrap();

        let signature = MethodSignature::new("bank.Account", "deposit", &["int"]);
        assert_eq!(weaver.advice_set(&signature).unwrap().before().len(), 4);

        let account = weaver.create_woven_instance("bank.Account").unwrap().unwrap();
        account.invoke("deposit", &["int"], vec![value(1i32)]).unwrap();
        assert_eq!(
            *tracker.seen.lock(),
            vec!["before-2", "before-2", "before-1", "before-1"]
        );
    }

    #[test]
    fn test_malformed_selector_registers_nothing() {
        let weaver = weaver();
        let aspect = AspectDefinition::builder("Broken", ())
            .before("bank.Account.deposit(...)", 0, |_: &(), _: &mut JoinPoint| Ok(()))
            .after("bank.Account.deposit", 0, |_: &(), _: &mut JoinPoint| Ok(()))
            .build();

        let err = weaver.register_aspect(aspect).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WeaveError>(),
            Some(WeaveError::MalformedSelector { .. })
        ));
        assert!(!weaver.is_woven("bank.Account"));
        assert!(weaver
            .advice_set(&MethodSignature::new("bank.Account", "deposit", &["int"]))
            .is_none());
    }

    #[test]
    fn test_unmatched_selector_is_not_an_error() {
        let weaver = weaver();
        let aspect = AspectDefinition::builder("Nowhere", ())
            .before("bank.Missing.deposit(...)", 0, |_: &(), _: &mut JoinPoint| Ok(()))
            .build();
        assert_eq!(weaver.register_aspect(aspect).unwrap(), 0);
    }

    #[test]
    fn test_excluded_namespace_is_never_woven() {
        let weaver = weaver();
        weaver.register_type(account_type("tapestry.internal.Account"));
        let aspect = AspectDefinition::builder("Internal", ())
            .before("tapestry.internal.Account.deposit(...)", 0, |_: &(), _: &mut JoinPoint| Ok(()))
            .build();

        assert_eq!(weaver.register_aspect(aspect).unwrap(), 0);
        assert!(!weaver.is_woven("tapestry.internal.Account"));
        assert_eq!(weaver.register_intercept_target("tapestry.internal.Account").unwrap(), 0);
    }

    #[test]
    fn test_create_woven_instance_for_unwoven_types() {
        let weaver = weaver();
        assert!(weaver.create_woven_instance("bank.Account").unwrap().is_none());
        assert!(weaver.create_woven_instance("bank.Unknown").unwrap().is_none());
    }

    #[test]
    fn test_intercept_target() {
        let weaver = weaver();
        assert_eq!(weaver.register_intercept_target("bank.Account").unwrap(), 1);
        // 已织入的类型不会重复登记
        assert_eq!(weaver.register_intercept_target("bank.Account").unwrap(), 0);
        assert_eq!(weaver.registration("bank.Account").unwrap().mode(), WeaveMode::Intercepts);

        let account = weaver.create_woven_instance("bank.Account").unwrap().unwrap();
        account.invoke("deposit", &["int"], vec![value(5i32)]).unwrap();
        account.invoke("deposit", &[], Vec::new()).unwrap();
        assert_eq!(
            *account.target_as::<Account>().unwrap().log.lock(),
            vec!["audit", "deposit 5", "deposit"]
        );

        assert_eq!(weaver.register_intercept_target("bank.Ledger").unwrap(), 0);
        let err = weaver.register_intercept_target("bank.Unknown").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WeaveError>(),
            Some(WeaveError::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_aspect_woven_type_ignores_intercept_registration() {
        let weaver = weaver();
        weaver.register_aspect(tracking_aspect(Arc::default())).unwrap();
        assert_eq!(weaver.register_intercept_target("bank.Account").unwrap(), 0);
        assert_eq!(weaver.registration("bank.Account").unwrap().mode(), WeaveMode::Aspects);
    }

    #[test]
    fn test_aspect_replaces_intercept_registration() {
        let weaver = weaver();
        weaver.register_intercept_target("bank.Account").unwrap();
        weaver.register_aspect(tracking_aspect(Arc::default())).unwrap();
        assert_eq!(weaver.registration("bank.Account").unwrap().mode(), WeaveMode::Aspects);
    }

    #[test]
    fn test_weave_existing_target() {
        let weaver = weaver();
        let tracker = Arc::new(Tracker::default());
        weaver.register_aspect(tracking_aspect(Arc::clone(&tracker))).unwrap();

        let target: Target = Arc::new(Account::default());
        let account = weaver.weave_instance("bank.Account", Arc::clone(&target)).unwrap();
        account.invoke("deposit", &[], Vec::new()).unwrap();

        assert_eq!(*tracker.seen.lock(), vec!["before-1"]);
        assert_eq!(*target.downcast_ref::<Account>().unwrap().log.lock(), vec!["deposit"]);
        assert!(weaver.weave_instance("bank.Ledger", target).is_none());
    }

    #[test]
    fn test_instance_weaver_as_trait_object() {
        let weaver: Arc<dyn InstanceWeaver> = Arc::new(weaver());
        assert!(!weaver.is_woven("bank.Account"));
        weaver.register_aspect(tracking_aspect(Arc::default())).unwrap();
        assert!(weaver.create_woven_instance("bank.Account").unwrap().is_some());
    }
}
