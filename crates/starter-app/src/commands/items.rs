use super::{failed, require_user, CommandResult};
use crate::app::AppState;
use crate::notify::Notice;
use crate::ItemsCommand;
use data_access::{DataError, Item, ItemInsert, ItemUpdate};

pub async fn run_items(app: &mut AppState, command: ItemsCommand) -> CommandResult {
    let user = require_user(app)?;

    match command {
        ItemsCommand::List { status } => {
            let items = match status {
                Some(status) => app.items.list_by_status(&user.id, status).await,
                None => app.items.list(&user.id).await,
            }
            .map_err(|e| failed("Failed to load items", e))?;
            print_list(&items);
        }
        ItemsCommand::Show { id } => {
            match app
                .items
                .get(&id)
                .await
                .map_err(|e| failed("Failed to load item", e))?
            {
                Some(item) => print_item(&item),
                None => return Err(failed("Failed to load item", format!("no item with id {}", id))),
            }
        }
        ItemsCommand::Create { title, description } => {
            let mut insert = ItemInsert::new(&user.id, title);
            if let Some(description) = description {
                insert = insert.description(description);
            }
            let item = app
                .items
                .create(&insert)
                .await
                .map_err(|e| failed("Failed to create item", e))?;
            Notice::success("Item created").show();
            print_item(&item);
        }
        ItemsCommand::Update {
            id,
            title,
            description,
            status,
        } => {
            let patch = ItemUpdate {
                title,
                description,
                status,
                metadata: None,
            };
            if patch.is_empty() {
                Notice::info("Nothing to update").show();
                return Ok(());
            }
            let item = app
                .items
                .update(&id, &patch)
                .await
                .map_err(|e| failed("Failed to update item", e))?;
            Notice::success("Item updated").show();
            print_item(&item);
        }
        ItemsCommand::Status { id, status } => {
            let item = app
                .items
                .update_status(&id, status)
                .await
                .map_err(|e| failed("Failed to update status", e))?;
            Notice::success(format!("Item moved to {}", item.status)).show();
        }
        ItemsCommand::Archive { id } => {
            app.items
                .archive(&id)
                .await
                .map_err(|e| failed("Failed to archive item", e))?;
            Notice::success("Item archived").show();
        }
        ItemsCommand::Delete { id } => {
            app.items
                .delete(&id)
                .await
                .map_err(|e| failed("Failed to delete item", e))?;
            Notice::success("Item deleted").show();
        }
        ItemsCommand::Search { query } => {
            let items = app
                .items
                .search(&user.id, &query)
                .await
                .map_err(|e| failed("Search failed", e))?;
            print_list(&items);
        }
        ItemsCommand::BulkStatus { status, ids } => match app.items.bulk_update_status(&ids, status).await {
            Ok(items) => {
                Notice::success(format!("Moved {} items to {}", items.len(), status)).show();
            }
            Err(DataError::PartialBulkUpdate { updated, missing }) => {
                Notice::info(format!("Moved {} items to {}", updated.len(), status)).show();
                return Err(failed("Some items were not updated", missing.join(", ")));
            }
            Err(e) => return Err(failed("Failed to update items", e)),
        },
    }
    Ok(())
}

fn print_list(items: &[Item]) {
    if items.is_empty() {
        println!("No items yet.");
        return;
    }
    for item in items {
        println!("{}  {:<11}  {}", item.id, item.status, item.title);
    }
}

fn print_item(item: &Item) {
    println!("Id:          {}", item.id);
    println!("Title:       {}", item.title);
    if let Some(description) = &item.description {
        println!("Description: {}", description);
    }
    println!("Status:      {}", item.status);
    println!("Created:     {}", item.created_at.format("%Y-%m-%d %H:%M"));
    println!("Updated:     {}", item.updated_at.format("%Y-%m-%d %H:%M"));
}
