use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tapestry_aop::prelude::*;
use tapestry_core::prelude::*;

// ==================== 业务类型 ====================

/// 库存服务：通过切面织入
#[derive(Default)]
struct InventoryService {
    stock: Mutex<HashMap<String, u32>>,
}

impl InventoryService {
    fn restock(&self, sku: &str, quantity: u32) -> u32 {
        let mut stock = self.stock.lock();
        let level = stock.entry(sku.to_string()).or_insert(0);
        *level += quantity;
        *level
    }

    fn take(&self, sku: &str, quantity: u32) -> Result<u32> {
        let mut stock = self.stock.lock();
        let level = stock.get_mut(sku).ok_or_else(|| anyhow!("unknown sku '{}'", sku))?;
        if *level < quantity {
            bail!("insufficient stock for '{}': {} < {}", sku, level, quantity);
        }
        *level -= quantity;
        Ok(*level)
    }
}

fn describe_inventory() -> TypeDescriptor {
    TypeDescriptor::concrete("shop.InventoryService", InventoryService::default)
        .method("restock", &["String", "u32"], |svc: &InventoryService, args| {
            let sku = arg::<String>(args, 0)?;
            let quantity = arg::<u32>(args, 1)?;
            Ok(Some(value(svc.restock(sku, *quantity))))
        })
        .method("take", &["String", "u32"], |svc: &InventoryService, args| {
            let sku = arg::<String>(args, 0)?;
            let quantity = arg::<u32>(args, 1)?;
            Ok(Some(value(svc.take(sku, *quantity)?)))
        })
        .method("take", &["String"], |svc: &InventoryService, args| {
            let sku = arg::<String>(args, 0)?;
            Ok(Some(value(svc.take(sku, 1)?)))
        })
        .build()
}

register_type!("shop.InventoryService", describe_inventory);

/// 价格服务：通过单一拦截器织入
#[derive(Default)]
struct PricingService;

fn describe_pricing() -> TypeDescriptor {
    TypeDescriptor::concrete("shop.PricingService", PricingService::default)
        .method("quote", &["String"], |_: &PricingService, args| {
            let sku = arg::<String>(args, 0)?;
            Ok(Some(value(sku.len() as u64 * 250)))
        })
        .intercepted_by::<DiscountInterceptor>()
        .build()
}

register_type!("shop.PricingService", describe_pricing);

/// 价格打八折
#[derive(Default)]
struct DiscountInterceptor;

impl MethodInterceptor for DiscountInterceptor {
    fn intercept(&self, join_point: &mut ProceedJoinPoint) -> Result<Option<Value>> {
        let price = join_point
            .proceed()?
            .and_then(|v| v.downcast_ref::<u64>().copied())
            .unwrap_or(0);
        tracing::info!(original = price, "Applying discount on {}", join_point.signature());
        Ok(Some(value(price * 8 / 10)))
    }
}

// ==================== 切面 ====================

/// 审计切面：记录库存变动，拒绝超量出库
struct AuditAspect {
    max_take: u32,
}

impl AuditAspect {
    fn check_limit(&self, jp: &mut JoinPoint) -> Result<()> {
        if let Some(quantity) = jp.arg::<u32>(1) {
            if *quantity > self.max_take {
                bail!("take of {} exceeds the audit limit {}", quantity, self.max_take);
            }
        }
        jp.set_param("audit.limit", value(self.max_take));
        Ok(())
    }

    fn record(&self, jp: &mut JoinPoint) -> Result<()> {
        let level = jp.result_as::<u32>().copied();
        let limit = jp.param_as::<u32>("audit.limit").copied();
        tracing::info!(stock = ?level, limit = ?limit, "Audit: {}", jp.signature());
        Ok(())
    }

    fn retry_once(&self, jp: &mut ProceedJoinPoint) -> Result<Option<Value>> {
        match jp.proceed() {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!("Retrying {} after: {}", jp.signature(), e);
                jp.proceed()
            }
        }
    }
}

impl Aspect for AuditAspect {
    fn definition() -> AspectDefinition {
        AspectDefinition::builder("AuditAspect", AuditAspect { max_take: 100 })
            .before("shop.InventoryService.take(...)", 10, AuditAspect::check_limit)
            .after_returning("shop.InventoryService.*(String,u32)", 0, AuditAspect::record)
            .around("shop.InventoryService.take(String)", 0, AuditAspect::retry_once)
            .build()
    }
}

register_aspect!(AuditAspect);

// ==================== 主程序 ====================

fn load_config() -> Result<TapestryConfig> {
    let config_paths = ["demos/weave-demo/tapestry.toml", "tapestry.toml"];
    for path in config_paths {
        if std::path::Path::new(path).exists() {
            return Ok(TapestryConfig::load(path)?);
        }
    }
    Ok(TapestryConfig::from_env_or_default()?)
}

fn print_result(label: &str, outcome: Result<Option<Value>>) {
    match outcome {
        Ok(Some(v)) => {
            if let Some(n) = v.downcast_ref::<u32>() {
                println!("   {} -> {}", label, n);
            } else if let Some(n) = v.downcast_ref::<u64>() {
                println!("   {} -> {}", label, n);
            } else {
                println!("   {} -> <value>", label);
            }
        }
        Ok(None) => println!("   {} -> (none)", label),
        Err(e) => println!("   {} -> error: {}", label, e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║     Tapestry Weaving - Demo                        ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    let config = load_config()?;
    config.logging.clone().with_env_overrides().init()?;

    // 加载 inventory 注册的类型、拦截器和切面
    let weaver = Arc::new(Weaver::new(config.weaver.clone()));
    let aspects = weaver.load_registered()?;
    println!("📦 Loaded {} registered aspect(s)", aspects);

    // 内置切面
    weaver.register_aspect(LoggingAspect::new("shop.InventoryService.*(...)").with_order(100).definition())?;
    weaver.register_aspect(PerformanceAspect::new(5, "shop.InventoryService.*(...)").definition())?;
    weaver.register_aspect(ErrorLoggingAspect::new("shop.InventoryService.take(String,u32)").definition())?;

    let inventory = weaver
        .create_woven_instance("shop.InventoryService")?
        .context("InventoryService should be woven")?;
    let pricing = weaver
        .create_woven_instance("shop.PricingService")?
        .context("PricingService should be woven")?;

    println!("\n🔧 Calling woven methods");
    let sku = String::from("widget");
    print_result("restock(widget, 20)", invoke!(inventory, "restock"("String": sku.clone(), "u32": 20u32)));
    print_result("take(widget, 5)", invoke!(inventory, "take"("String": sku.clone(), "u32": 5u32)));
    // 超过审计上限：Before 拒绝，错误直接返回给调用方
    print_result("take(widget, 500)", invoke!(inventory, "take"("String": sku.clone(), "u32": 500u32)));
    // 未知 sku：错误被异常通知记录并吞掉
    print_result("take(gadget, 1)", invoke!(inventory, "take"("String": String::from("gadget"), "u32": 1u32)));
    print_result("take(widget)", invoke!(inventory, "take"("String": sku.clone())));
    print_result("quote(widget)", invoke!(pricing, "quote"("String": sku.clone())));

    println!("\n🧵 Concurrent calls on one woven instance");
    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let inventory = inventory.clone();
        let sku = sku.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            inventory.invoke("restock", &["String", "u32"], args![sku, worker + 1])
        }));
    }
    for handle in handles {
        print_result("restock", handle.await?);
    }

    let signature = MethodSignature::new("shop.InventoryService", "take", &["String", "u32"]);
    if let Some(set) = weaver.advice_set(&signature) {
        println!(
            "\n📋 {}: {} before, {} after, {} around, {} afterReturning, {} afterThrowing",
            signature,
            set.before().len(),
            set.after().len(),
            set.around().len(),
            set.after_returning().len(),
            set.after_throwing().len()
        );
    }

    println!(
        "\n🌐 Global weaver knows InventoryService: {}",
        global_weaver().is_woven("shop.InventoryService")
    );

    println!("\n✅ Demo complete!");
    Ok(())
}
