//! Stream Repository
//!
//! Streams and their append-only lines.

use conveyor_core::domain::build::{Stream, StreamLine};
use uuid::Uuid;

use super::store::{
    KvStore, StoreResult, decode, get_json, insert_json, keys, put_json, scan_json,
};

pub async fn save(store: &dyn KvStore, stream: &Stream) -> StoreResult<()> {
    put_json(store, &keys::stream(stream.build_step_id, stream.id), stream).await
}

pub async fn find(
    store: &dyn KvStore,
    step_id: Uuid,
    stream_id: Uuid,
) -> StoreResult<Option<Stream>> {
    get_json(store, &keys::stream(step_id, stream_id)).await
}

/// Looks a stream up by id alone; its step id is only known from the key
pub async fn find_by_id(store: &dyn KvStore, stream_id: Uuid) -> StoreResult<Option<Stream>> {
    match store
        .find_by_suffix("stream-", &format!("-{stream_id}"))
        .await?
    {
        Some((key, value)) => decode(&key, value).map(Some),
        None => Ok(None),
    }
}

pub async fn list_by_step(store: &dyn KvStore, step_id: Uuid) -> StoreResult<Vec<Stream>> {
    let mut streams: Vec<Stream> = scan_json(store, &keys::streams(step_id)).await?;
    streams.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(streams)
}

/// Deletes a stream together with its lines
pub async fn delete(store: &dyn KvStore, stream: &Stream) -> StoreResult<()> {
    for (key, _) in store.scan_prefix(&keys::stream_lines(stream.id)).await? {
        store.delete(&key).await?;
    }
    store
        .delete(&keys::stream(stream.build_step_id, stream.id))
        .await?;
    Ok(())
}

/// Stores a new line; returns false if the stream already has that line number
pub async fn append_line(store: &dyn KvStore, line: &StreamLine) -> StoreResult<bool> {
    insert_json(store, &keys::stream_line(line.stream_id, line.line_number), line).await
}

/// Lines of a stream with a line number of at least `from`, in order
pub async fn list_lines(store: &dyn KvStore, stream_id: Uuid, from: u64) -> StoreResult<Vec<StreamLine>> {
    let lines: Vec<StreamLine> = scan_json(store, &keys::stream_lines(stream_id)).await?;
    Ok(lines.into_iter().filter(|l| l.line_number >= from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryStore;
    use conveyor_core::domain::build::StepStatus;

    fn line(stream_id: Uuid, line_number: u64) -> StreamLine {
        StreamLine {
            stream_id,
            line_number,
            timestamp: chrono::Utc::now(),
            status: StepStatus::Running,
            output: format!("line {line_number}"),
        }
    }

    #[tokio::test]
    async fn test_find_stream_by_id() {
        let store = MemoryStore::new();
        let step_id = Uuid::new_v4();
        let web = Stream::new(step_id, "web");
        let db = Stream::new(step_id, "db");
        save(&store, &web).await.unwrap();
        save(&store, &db).await.unwrap();

        assert_eq!(find_by_id(&store, web.id).await.unwrap(), Some(web));
        assert!(find_by_id(&store, Uuid::new_v4()).await.unwrap().is_none());

        let names: Vec<String> = list_by_step(&store, step_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["db", "web"]);
    }

    #[tokio::test]
    async fn test_lines_in_numeric_order_from_offset() {
        let store = MemoryStore::new();
        let stream_id = Uuid::new_v4();
        for n in [1, 10, 2, 3] {
            append_line(&store, &line(stream_id, n)).await.unwrap();
        }

        let numbers: Vec<u64> = list_lines(&store, stream_id, 1)
            .await
            .unwrap()
            .iter()
            .map(|l| l.line_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 10]);

        let tail = list_lines(&store, stream_id, 3).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn test_lines_are_never_rewritten() {
        let store = MemoryStore::new();
        let stream_id = Uuid::new_v4();
        let first = line(stream_id, 1);
        let mut again = line(stream_id, 1);
        again.output = "rewritten".into();

        assert!(append_line(&store, &first).await.unwrap());
        assert!(!append_line(&store, &again).await.unwrap());

        let outputs: Vec<String> = list_lines(&store, stream_id, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.output)
            .collect();
        assert_eq!(outputs, vec![first.output]);
    }

    #[tokio::test]
    async fn test_find_requires_matching_step() {
        let store = MemoryStore::new();
        let stream = Stream::new(Uuid::new_v4(), "run");
        save(&store, &stream).await.unwrap();

        assert_eq!(
            find(&store, stream.build_step_id, stream.id).await.unwrap(),
            Some(stream.clone())
        );
        assert!(find(&store, Uuid::new_v4(), stream.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_lines() {
        let store = MemoryStore::new();
        let stream = Stream::new(Uuid::new_v4(), "run");
        save(&store, &stream).await.unwrap();
        append_line(&store, &line(stream.id, 1)).await.unwrap();

        delete(&store, &stream).await.unwrap();
        assert_eq!(store.len(), 0);
    }
}
