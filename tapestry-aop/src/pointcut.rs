//! 切点（Pointcut）表达式编译
//!
//! 支持的写法：
//!
//! - `a.b.C.foo(...)`：`foo` 的所有重载，不论参数个数与类型
//! - `a.b.C.foo()`：只匹配无参的 `foo`
//! - `a.b.C.foo(int, java.lang.String)`：只匹配参数类型完全一致（含顺序）的 `foo`
//! - `a.b.*.foo(...)`：命名空间 `a.b` 下所有具体类型的 `foo`
//!
//! 类型与方法名中的 `*` 匹配任意字符序列。表达式被编译成一个针对
//! [`MethodSignature`] 的正则表达式。

use crate::catalog::TypeResolver;
use crate::types::{MethodHandle, MethodSignature, TypeDescriptor};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tapestry_core::{WeaveError, WeaveResult};

const ANY_PARAMS: &str = "...";
const WILDCARD: &str = "*";

/// 参数匹配方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// `...`：任意参数
    Any,
    /// 空括号：无参数
    Empty,
    /// 逗号分隔的参数类型列表
    Exact(Vec<String>),
}

/// 目标类型的定位方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLocator {
    /// 单个类型全名
    Named(String),
    /// 需要扫描的命名空间
    Namespace(String),
}

/// 切点匹配到的方法
#[derive(Debug, Clone)]
pub struct MatchedMethod {
    pub declaring_type: Arc<TypeDescriptor>,
    pub method: MethodHandle,
}

/// 编译后的切点
#[derive(Clone)]
pub struct Pointcut {
    selector: String,
    locator: TypeLocator,
    params: ParamSpec,
    regex: Regex,
}

impl Pointcut {
    /// 编译切点表达式，格式错误时立即返回 [`WeaveError::MalformedSelector`]
    pub fn compile(selector: &str) -> WeaveResult<Self> {
        let compact: String = selector.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = |reason: &str| WeaveError::malformed(selector, reason);

        if compact.is_empty() {
            return Err(malformed("selector is empty"));
        }
        let open = compact
            .find('(')
            .ok_or_else(|| malformed("missing parameter list"))?;
        if !compact.ends_with(')') {
            return Err(malformed("parameter list must close the selector"));
        }
        let head = &compact[..open];
        if head.contains([')', ',']) {
            return Err(malformed("unexpected character before the parameter list"));
        }
        let raw_params = &compact[open + 1..compact.len() - 1];
        if raw_params.contains('(') || raw_params.contains(')') {
            return Err(malformed("unbalanced parentheses"));
        }

        let (type_part, method_name) = head
            .rsplit_once('.')
            .ok_or_else(|| malformed("expected '<type>.<method>(<params>)'"))?;
        if type_part.is_empty() || method_name.is_empty() {
            return Err(malformed("type and method name must not be empty"));
        }
        if type_part.split('.').any(str::is_empty) {
            return Err(malformed("empty segment in type name"));
        }

        let params = Self::parse_params(raw_params).map_err(|reason| malformed(reason))?;
        let type_part = Self::collapse_wildcards(type_part);
        let locator = Self::locate(type_part);
        let pattern = Self::build_pattern(&format!("{}.{}", type_part, method_name), &params);
        let regex = Regex::new(&pattern).map_err(|e| malformed(&e.to_string()))?;

        Ok(Self {
            selector: selector.to_string(),
            locator,
            params,
            regex,
        })
    }

    fn parse_params(raw: &str) -> Result<ParamSpec, &'static str> {
        match raw {
            "" => Ok(ParamSpec::Empty),
            ANY_PARAMS => Ok(ParamSpec::Any),
            _ => {
                let types = Self::split_params(raw);
                if types.iter().any(String::is_empty) {
                    return Err("empty parameter type");
                }
                if types.iter().any(|t| t == ANY_PARAMS) {
                    return Err("'...' cannot be combined with explicit parameter types");
                }
                Ok(ParamSpec::Exact(types))
            }
        }
    }

    /// 按顶层逗号切分，泛型参数内的逗号不切分
    fn split_params(raw: &str) -> Vec<String> {
        let mut types = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for (i, c) in raw.char_indices() {
            match c {
                '<' | '[' => depth += 1,
                '>' | ']' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    types.push(raw[start..i].to_string());
                    start = i + 1;
                }
                _ => {}
            }
        }
        types.push(raw[start..].to_string());
        types
    }

    /// `a.b.*.*` 与 `a.b.*` 等价：扫描只覆盖命名空间的直接成员
    fn collapse_wildcards(type_part: &str) -> &str {
        let mut collapsed = type_part;
        while let Some(stripped) = collapsed.strip_suffix(".*") {
            if !stripped.ends_with(".*") && stripped != WILDCARD {
                break;
            }
            collapsed = stripped;
        }
        collapsed
    }

    /// 类型名最后一段含 `*` 时扫描其所在命名空间，否则按全名查找
    fn locate(type_part: &str) -> TypeLocator {
        let last = type_part.rsplit('.').next().unwrap_or(type_part);
        if !last.contains(WILDCARD) {
            return TypeLocator::Named(type_part.to_string());
        }

        let mut namespace = type_part;
        while let Some(stripped) = namespace.strip_suffix(".*") {
            namespace = stripped;
        }
        let namespace = match namespace.rsplit_once('.') {
            // `a.b.Foo*` 扫描 `a.b`
            Some((ns, segment)) if segment.contains(WILDCARD) => ns,
            Some(_) => namespace,
            None if namespace.contains(WILDCARD) => "",
            None => namespace,
        };
        TypeLocator::Namespace(namespace.to_string())
    }

    fn build_pattern(head: &str, params: &ParamSpec) -> String {
        let head_pattern = head
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let params_pattern = match params {
            ParamSpec::Any => r"\(.*\)".to_string(),
            ParamSpec::Empty => r"\(\)".to_string(),
            ParamSpec::Exact(types) => format!(r"\({}\)", regex::escape(&types.join(","))),
        };

        format!("^{}{}$", head_pattern, params_pattern)
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn locator(&self) -> &TypeLocator {
        &self.locator
    }

    pub fn params(&self) -> &ParamSpec {
        &self.params
    }

    /// 签名是否匹配
    pub fn matches(&self, signature: &MethodSignature) -> bool {
        self.regex.is_match(signature.as_str())
    }

    /// 候选类型，抽象类型和接口已被排除
    pub fn candidate_types(&self, resolver: &dyn TypeResolver) -> Vec<Arc<TypeDescriptor>> {
        let candidates = match &self.locator {
            TypeLocator::Named(name) => resolver.resolve_type(name).into_iter().collect(),
            TypeLocator::Namespace(namespace) => resolver.scan_namespace(namespace),
        };
        candidates.into_iter().filter(|t| t.is_concrete()).collect()
    }

    /// 解析出所有匹配的（类型，方法）
    ///
    /// 目标类型不存在时返回空集合而不是错误。
    pub fn select(&self, resolver: &dyn TypeResolver) -> Vec<MatchedMethod> {
        self.candidate_types(resolver)
            .into_iter()
            .flat_map(|declaring_type| {
                declaring_type
                    .methods()
                    .iter()
                    .filter(|m| self.matches(m.signature()))
                    .map(|method| MatchedMethod {
                        declaring_type: Arc::clone(&declaring_type),
                        method: method.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl FromStr for Pointcut {
    type Err = WeaveError;

    fn from_str(s: &str) -> WeaveResult<Self> {
        Self::compile(s)
    }
}

impl fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointcut")
            .field("selector", &self.selector)
            .field("locator", &self.locator)
            .field("params", &self.params)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

impl fmt::Display for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TypeCatalog;

    fn sig(owner: &str, name: &str, params: &[&str]) -> MethodSignature {
        MethodSignature::new(owner, name, params)
    }

    fn catalog() -> TypeCatalog {
        let catalog = TypeCatalog::new();
        catalog.register(
            TypeDescriptor::concrete("a.b.C", || ())
                .method("foo", &[] as &[&str], |_: &(), _| Ok(None))
                .method("foo", &["int"], |_: &(), _| Ok(None))
                .method("foo", &["int", "java.lang.String"], |_: &(), _| Ok(None))
                .method("bar", &["int"], |_: &(), _| Ok(None))
                .method("load", &["HashMap<String, i32>"], |_: &(), _| Ok(None))
                .method("load", &["HashMap<String, i32>", "Vec<u8>"], |_: &(), _| Ok(None))
                .build(),
        );
        catalog.register(
            TypeDescriptor::concrete("a.b.D", || ())
                .method("foo", &["long"], |_: &(), _| Ok(None))
                .build(),
        );
        catalog.register(
            TypeDescriptor::abstract_type("a.b.Base")
                .declare("foo", &["int"])
                .build(),
        );
        catalog.register(
            TypeDescriptor::interface("a.b.Api")
                .declare("foo", &[] as &[&str])
                .build(),
        );
        catalog
    }

    fn selected(selector: &str, catalog: &TypeCatalog) -> Vec<String> {
        Pointcut::compile(selector)
            .unwrap()
            .select(catalog)
            .into_iter()
            .map(|m| m.method.signature().to_string())
            .collect()
    }

    #[test]
    fn test_any_params_matches_every_overload() {
        let pc = Pointcut::compile("a.b.C.foo(...)").unwrap();
        assert_eq!(pc.params(), &ParamSpec::Any);
        assert!(pc.matches(&sig("a.b.C", "foo", &[])));
        assert!(pc.matches(&sig("a.b.C", "foo", &["int"])));
        assert!(pc.matches(&sig("a.b.C", "foo", &["int", "java.lang.String"])));
        assert!(!pc.matches(&sig("a.b.C", "bar", &["int"])));
        assert!(!pc.matches(&sig("a.b.C", "foobar", &[])));
    }

    #[test]
    fn test_empty_params_matches_only_zero_arg_overload() {
        let pc = Pointcut::compile("a.b.C.foo()").unwrap();
        assert_eq!(pc.params(), &ParamSpec::Empty);
        assert!(pc.matches(&sig("a.b.C", "foo", &[])));
        assert!(!pc.matches(&sig("a.b.C", "foo", &["int"])));
    }

    #[test]
    fn test_exact_params_are_order_sensitive() {
        let pc = Pointcut::compile("a.b.C.foo( int , java.lang.String )").unwrap();
        assert_eq!(
            pc.params(),
            &ParamSpec::Exact(vec!["int".to_string(), "java.lang.String".to_string()])
        );
        assert!(pc.matches(&sig("a.b.C", "foo", &["int", "java.lang.String"])));
        assert!(!pc.matches(&sig("a.b.C", "foo", &["java.lang.String", "int"])));
        assert!(!pc.matches(&sig("a.b.C", "foo", &["int"])));
    }

    #[test]
    fn test_dots_are_literal() {
        let pc = Pointcut::compile("a.b.C.foo()").unwrap();
        assert!(!pc.matches(&sig("axb.C", "foo", &[])));
        assert!(!pc.matches(&sig("a.bxC", "foo", &[])));
    }

    #[test]
    fn test_method_name_wildcard() {
        let pc = Pointcut::compile("a.b.C.get*(...)").unwrap();
        assert!(pc.matches(&sig("a.b.C", "getName", &[])));
        assert!(pc.matches(&sig("a.b.C", "get", &["int"])));
        assert!(!pc.matches(&sig("a.b.C", "setName", &[])));
    }

    #[test]
    fn test_locator() {
        assert_eq!(
            Pointcut::compile("a.b.C.foo()").unwrap().locator(),
            &TypeLocator::Named("a.b.C".to_string())
        );
        assert_eq!(
            Pointcut::compile("a.b.*.foo()").unwrap().locator(),
            &TypeLocator::Namespace("a.b".to_string())
        );
        assert_eq!(
            Pointcut::compile("a.b.*.*.foo()").unwrap().locator(),
            &TypeLocator::Namespace("a.b".to_string())
        );
        assert_eq!(
            Pointcut::compile("a.b.Svc*.foo()").unwrap().locator(),
            &TypeLocator::Namespace("a.b".to_string())
        );
    }

    #[test]
    fn test_malformed_selectors_are_rejected() {
        for selector in [
            "",
            "a.b.C.foo",
            "foo()",
            "a.b.C.foo(int",
            "a.b.C.foo(int))",
            "a.b.C.foo(int,)",
            "a.b.C.foo(int,...)",
            "a.b.C.(int)",
            "a..C.foo()",
            "a.b.C.foo()x",
            "a.b)C.foo()",
            "a,b.C.foo()",
        ] {
            let err = Pointcut::compile(selector).unwrap_err();
            assert!(
                matches!(err, WeaveError::MalformedSelector { .. }),
                "selector {:?} should be malformed",
                selector
            );
        }
    }

    #[test]
    fn test_select_named_type() {
        let catalog = catalog();
        assert_eq!(
            selected("a.b.C.foo(...)", &catalog),
            vec!["a.b.C.foo()", "a.b.C.foo(int)", "a.b.C.foo(int,java.lang.String)"]
        );
        assert_eq!(selected("a.b.C.foo()", &catalog), vec!["a.b.C.foo()"]);
        assert_eq!(selected("a.b.C.foo(int)", &catalog), vec!["a.b.C.foo(int)"]);
    }

    #[test]
    fn test_select_wildcard_namespace_skips_abstract_types() {
        let catalog = catalog();
        assert_eq!(
            selected("a.b.*.foo(...)", &catalog),
            vec![
                "a.b.C.foo()",
                "a.b.C.foo(int)",
                "a.b.C.foo(int,java.lang.String)",
                "a.b.D.foo(long)",
            ]
        );
    }

    #[test]
    fn test_exact_generic_param_types() {
        let pc = Pointcut::compile("a.b.C.load(HashMap<String, i32>)").unwrap();
        assert_eq!(
            pc.params(),
            &ParamSpec::Exact(vec!["HashMap<String,i32>".to_string()])
        );

        let catalog = catalog();
        assert_eq!(
            selected("a.b.C.load(HashMap<String, i32>)", &catalog),
            vec!["a.b.C.load(HashMap<String,i32>)"]
        );
        assert_eq!(
            selected("a.b.C.load(HashMap<String,i32>, Vec<u8>)", &catalog),
            vec!["a.b.C.load(HashMap<String,i32>,Vec<u8>)"]
        );
    }

    #[test]
    fn test_repeated_trailing_wildcards_scan_namespace_members() {
        let catalog = catalog();
        assert_eq!(
            selected("a.b.*.*.foo(long)", &catalog),
            vec!["a.b.D.foo(long)"]
        );
        assert_eq!(selected("a.b.*.*.foo(...)", &catalog), selected("a.b.*.foo(...)", &catalog));
    }

    #[test]
    fn test_abstract_types_skipped_even_when_named() {
        let catalog = catalog();
        assert!(selected("a.b.Base.foo(int)", &catalog).is_empty());
        assert!(selected("a.b.Api.foo()", &catalog).is_empty());
    }

    #[test]
    fn test_unknown_type_yields_empty_set() {
        let catalog = catalog();
        assert!(selected("x.y.Missing.foo(...)", &catalog).is_empty());
        assert!(selected("x.y.*.foo(...)", &catalog).is_empty());
    }

    #[test]
    fn test_from_str_and_display() {
        let pc: Pointcut = "a.b.C.foo(...)".parse().unwrap();
        assert_eq!(pc.to_string(), "a.b.C.foo(...)");
        assert!("nope".parse::<Pointcut>().is_err());
    }
}
