use std::{env, fs, path::Path};

use ts_rs::TS;

fn generate_types_content() -> String {
    // Banner stops people editing the output by hand
    let header = "// This file was generated by `cargo run --bin generate-types`.\n// Do not edit this file manually.\n\n";

    let decls = [
        db::models::task::TaskStatus::decl(),
        db::models::task::TaskPriority::decl(),
        db::models::task::Task::decl(),
        db::models::task::CreateTask::decl(),
        db::models::task::UpdateTask::decl(),
        db::models::recurring_task::Frequency::decl(),
        db::models::recurring_task::RecurringTask::decl(),
        db::models::recurring_task::CreateRecurringTask::decl(),
        db::models::recurring_task::UpdateRecurringTask::decl(),
        db::models::push_subscription::PushSubscription::decl(),
        db::models::push_subscription::PushSubscriptionKeys::decl(),
        db::models::push_subscription::CreatePushSubscription::decl(),
        db::models::activity_log::ActivityAction::decl(),
        db::models::activity_log::ActivityLog::decl(),
        services::services::recurring_tasks::GenerationReport::decl(),
        services::services::push::Urgency::decl(),
        services::services::push::PushRequest::decl(),
        services::services::push::PushPayload::decl(),
        services::services::push::PushResult::decl(),
        services::services::push::PushReport::decl(),
        services::services::database_validator::ValidationResult::decl(),
        server::routes::recurring_tasks::RecurringTaskPreview::decl(),
        server::routes::push_subscriptions::DeletePushSubscription::decl(),
        server::routes::push_subscriptions::VapidPublicKey::decl(),
        utils::response::ApiResponse::<()>::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|decl| format!("export {decl}"))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{header}{body}\n")
}

fn main() {
    let check_mode = env::args().any(|arg| arg == "--check");
    let shared_path = Path::new("shared");
    let types_path = shared_path.join("types.ts");
    let generated = generate_types_content();

    if check_mode {
        let current = fs::read_to_string(&types_path).unwrap_or_default();
        if current == generated {
            println!("✅ shared/types.ts is up to date.");
            std::process::exit(0);
        } else {
            eprintln!("❌ shared/types.ts is not up to date. Please run 'cargo run --bin generate-types' and commit the changes.");
            std::process::exit(1);
        }
    }

    println!("Generating TypeScript types…");
    if let Err(e) = fs::create_dir_all(shared_path).and_then(|_| fs::write(&types_path, generated)) {
        eprintln!("Failed to write {}: {e}", types_path.display());
        std::process::exit(1);
    }
    println!("✅ TypeScript types written to {}", types_path.display());
}
