//! Tapestry AOP - 面向切面编程支持
//!
//! 为显式注册的类型提供方法级织入，支持：
//! - 基于签名正则的切点表达式（`a.b.C.foo(...)`、`a.b.*.foo()`、`a.b.C.foo(int,long)`）
//! - 多种通知类型（Before、After、Around、AfterReturning、AfterThrowing），按 `order` 排序
//! - 单一拦截器：方法表中标记的方法直接交给拦截器处理
//! - 通过 inventory 在启动时自动注册类型与切面

pub mod advice;
pub mod aspect;
pub mod catalog;
pub mod error_info;
pub mod interceptor;
pub mod joinpoint;
pub mod pointcut;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod weaver;

// 重新导出核心类型
pub use advice::{Advice, AdviceBody, AdviceKind, AroundAdvice, JoinPointAdvice, ThrowingAdvice};
pub use aspect::{
    registered_aspects, AdviceDeclaration, Aspect, AspectBuilder, AspectDefinition,
    AspectRegistration, ErrorLoggingAspect, LoggingAspect, PerformanceAspect,
};
pub use catalog::{registered_types, TypeCatalog, TypeRegistration, TypeResolver};
pub use error_info::ErrorInfo;
pub use interceptor::{InterceptDispatcher, InterceptorMarker, InterceptorRegistry, MethodInterceptor};
pub use joinpoint::{JoinPoint, ProceedJoinPoint};
pub use pointcut::{MatchedMethod, ParamSpec, Pointcut, TypeLocator};
pub use registry::{AdviceRegistry, AdviceSet};
pub use runtime::{AdviceDispatcher, CallDispatcher, WovenInstance};
pub use types::{
    arg, downcast_value, value, MethodDescriptor, MethodHandle, MethodSignature, Target,
    TypeBuilder, TypeDescriptor, TypeKind, Value,
};
pub use weaver::{global_weaver, InstanceWeaver, WeaveMode, Weaver, WeavingRegistration};

// 导出 inventory 供宏使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::aspect::{Aspect, AspectDefinition, ErrorLoggingAspect, LoggingAspect, PerformanceAspect};
    pub use crate::catalog::{TypeCatalog, TypeResolver};
    pub use crate::error_info::ErrorInfo;
    pub use crate::interceptor::MethodInterceptor;
    pub use crate::joinpoint::{JoinPoint, ProceedJoinPoint};
    pub use crate::runtime::WovenInstance;
    pub use crate::types::{arg, value, MethodSignature, Target, TypeDescriptor, Value};
    pub use crate::weaver::{global_weaver, InstanceWeaver, Weaver};
    pub use crate::{args, invoke, register_aspect, register_type};
}

/// 构造参数列表
///
/// ```ignore
/// let args = args![42i32, String::from("alice")];
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::value($arg)),+]
    };
}

/// 简化织入实例的方法调用
///
/// 参数写成 `"类型名": 值`，类型名即方法表中声明的参数类型：
/// ```ignore
/// use tapestry_aop::invoke;
///
/// let total = invoke!(order_service, "place"("u32": 3u32, "String": sku))?;
/// ```
#[macro_export]
macro_rules! invoke {
    ($instance:expr, $method:literal ( $($ty:literal : $arg:expr),* $(,)? )) => {
        $instance.invoke($method, &[$($ty),*], $crate::args![$($arg),*])
    };
}

/// 通过 inventory 注册类型，[`Weaver::load_registered`] 时载入
///
/// ```ignore
/// fn describe_order_service() -> TypeDescriptor { ... }
///
/// register_type!("shop.OrderService", describe_order_service);
/// ```
#[macro_export]
macro_rules! register_type {
    ($name:expr, $describe:path) => {
        $crate::inventory::submit! {
            $crate::TypeRegistration::new($name, $describe)
        }
    };
}

/// 通过 inventory 注册实现了 [`Aspect`] 的切面
#[macro_export]
macro_rules! register_aspect {
    ($aspect:ty) => {
        $crate::inventory::submit! {
            $crate::AspectRegistration::new(
                ::std::stringify!($aspect),
                <$aspect as $crate::Aspect>::definition,
            )
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use tapestry_core::Result;

    static CALLS: Lazy<Mutex<Vec<String>>> = Lazy::new(Mutex::default);

    #[derive(Default)]
    struct Greeter;

    fn describe_greeter() -> TypeDescriptor {
        TypeDescriptor::concrete("registry.demo.Greeter", Greeter::default)
            .method("greet", &["String"], |_: &Greeter, args| {
                let name = arg::<String>(args, 0)?;
                CALLS.lock().push(format!("greet {}", name));
                Ok(Some(value(format!("hello, {}", name))))
            })
            .build()
    }

    struct Shouting;

    impl Shouting {
        fn shout(&self, jp: &mut ProceedJoinPoint) -> Result<Option<Value>> {
            let greeting = jp.proceed()?;
            let text = greeting
                .as_ref()
                .and_then(|v| v.downcast_ref::<String>())
                .map(|s| s.to_uppercase())
                .unwrap_or_default();
            Ok(Some(value(text)))
        }
    }

    impl Aspect for Shouting {
        fn definition() -> AspectDefinition {
            AspectDefinition::builder("Shouting", Shouting)
                .around("registry.demo.*.greet(...)", 0, Shouting::shout)
                .build()
        }
    }

    register_type!("registry.demo.Greeter", describe_greeter);
    register_aspect!(Shouting);

    #[test]
    fn test_args_macro() {
        let args = args![1i32, String::from("x")];
        assert_eq!(args.len(), 2);
        assert_eq!(arg::<i32>(&args, 0).unwrap(), &1);
        assert!(args![].is_empty());
    }

    #[test]
    fn test_load_registered_and_invoke() {
        assert!(registered_types().any(|r| r.name == "registry.demo.Greeter"));
        assert!(registered_aspects().any(|r| r.name == "Shouting"));

        let weaver = Weaver::default();
        assert_eq!(weaver.load_registered().unwrap(), 1);
        assert!(weaver.is_woven("registry.demo.Greeter"));

        let greeter = weaver.create_woven_instance("registry.demo.Greeter").unwrap().unwrap();
        let result = invoke!(greeter, "greet"("String": String::from("ada"))).unwrap();
        let text = downcast_value::<String>(result.unwrap()).unwrap();
        assert_eq!(text.as_str(), "HELLO, ADA");
        assert!(CALLS.lock().contains(&"greet ada".to_string()));
    }
}
