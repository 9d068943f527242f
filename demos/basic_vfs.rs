use automerge::{transaction::Transactable, AutomergeError, ReadDoc, ROOT};
use loomfs::Engine;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let engine = Engine::new().await?;
    let vfs = engine.vfs();

    println!("Engine created with peer ID: {}", engine.peer_id());
    println!("Root ID: {}", vfs.root_id());

    vfs.create_document("/documents/example.txt", "Hello, VFS!".to_string())
        .await?;
    println!("Created document at /documents/example.txt");

    if let Some(handle) = vfs.find_document("/documents/example.txt").await? {
        handle.with_document(|doc| {
            if let Ok(Some((value, _))) = doc.get(ROOT, "content") {
                println!("Document content: {value}");
            }
        });
    }

    if let Some(watcher) = vfs.watch_document("/documents/example.txt").await? {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();

        let listener_task = tokio::spawn(async move {
            watcher
                .on_change(move |doc| {
                    if let Ok(Some((value, _))) = doc.get(ROOT, "content") {
                        println!("Document changed! New content: {value}");
                        changes_clone.lock().unwrap().push(value.to_string());
                    }
                })
                .await;
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        if let Some(handle) = vfs.find_document("/documents/example.txt").await? {
            println!("\nMaking changes to the document...");

            handle.with_document(|doc| {
                doc.transact::<_, _, AutomergeError>(|tx| {
                    tx.put(ROOT, "content", "Updated content!")?;
                    Ok(())
                })
                .unwrap();
            });

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

            handle.with_document(|doc| {
                doc.transact::<_, _, AutomergeError>(|tx| {
                    tx.put(ROOT, "content", "Final content!")?;
                    Ok(())
                })
                .unwrap();
            });

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }

        println!("\nChanges received: {:?}", changes.lock().unwrap());

        listener_task.abort();
    }

    let files = vfs.list_directory("/documents").await?;
    println!("\nFiles in /documents:");
    for file in files {
        println!("  - {} ({:?})", file.name, file.node_type);
    }

    Ok(())
}
