use crate::config::CliConfig;
use crate::providers::{build_providers, Providers};
use crate::{ClearArgs, DeleteArgs, DocsArgs, IngestArgs, RetrieveArgs};
use anyhow::{anyhow, Context as AnyhowContext, Result};
use kb_retrieval::{
    ingest_document, synthesize_answer, Chunk, IngestReport, IngestRequest, QueryExpander,
    Retrieval, RetrieveRequest, Retriever,
};
use kb_vector_store::{
    manifest_path, snapshot_path, Bm25Scope, DocumentEntry, DocumentManifest, DocumentSummary,
    StoreInfo, StoreOptions, VectorStore,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) struct App {
    pub data_dir: PathBuf,
    pub config: CliConfig,
    pub bm25_scope: Bm25Scope,
    pub pretty: bool,
    pub timeout: Option<Duration>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestOutput {
    report: IngestReport,
    document: DocumentEntry,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocsOutput {
    documents: Vec<DocumentEntry>,
    /// What the store actually holds, including documents missing from the
    /// manifest.
    indexed: Vec<DocumentSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovalOutput {
    removed_records: usize,
    removed_documents: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoOutput {
    data_dir: PathBuf,
    provider: &'static str,
    manifest_documents: usize,
    store: StoreInfo,
}

impl App {
    fn open_store(&self) -> VectorStore {
        VectorStore::with_options(
            Some(snapshot_path(&self.data_dir)),
            StoreOptions {
                bm25_scope: self.bm25_scope,
            },
        )
    }

    fn manifest(&self) -> DocumentManifest {
        DocumentManifest::new(manifest_path(&self.data_dir))
    }

    fn providers(&self) -> Result<Providers> {
        build_providers(&self.config.provider)
    }

    fn retriever(&self, providers: &Providers) -> Retriever {
        let retrieval = &self.config.retrieval;
        let expander = QueryExpander::new(providers.generator.clone()).with_sampling(
            retrieval.expansion_temperature,
            retrieval.expansion_max_tokens,
        );
        Retriever::new(providers.embedder.clone(), expander)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        let out = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{out}");
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| anyhow!("Timed out after {}s", limit.as_secs()))?,
            None => fut.await,
        }
    }

    pub(crate) async fn ingest(&self, args: IngestArgs) -> Result<()> {
        let chunks = read_chunks(&args.chunks)?;
        let original_name = args
            .original_name
            .clone()
            .or_else(|| {
                args.chunks
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .filter(|name| name != "-")
            .unwrap_or_else(|| args.doc_id.clone());

        let request = IngestRequest::new(&args.doc_id, chunks)
            .namespace(&args.namespace)
            .meta_entry("source", Value::from(original_name.clone()))
            .replace_existing(args.replace);

        let providers = self.providers()?;
        let mut store = self.open_store();
        let report = self
            .with_timeout(async {
                ingest_document(
                    &mut store,
                    providers.embedder.as_ref(),
                    request,
                    self.config.retrieval.embed_batch_size,
                )
                .await
                .map_err(anyhow::Error::from)
            })
            .await?;

        let mut entry = DocumentEntry::new(&args.doc_id, original_name);
        entry.pages = report.pages;
        entry.chunks = report.chunks;
        entry.namespace = Some(args.namespace.clone());
        let document = self
            .manifest()
            .upsert_document(entry)
            .context("Failed to update document manifest")?;

        self.emit(&IngestOutput { report, document })
    }

    async fn retrieve(
        &self,
        retriever: &Retriever,
        store: &mut VectorStore,
        request: &RetrieveRequest,
        broaden: bool,
    ) -> Result<Retrieval> {
        self.with_timeout(async {
            let retrieval = if broaden {
                retriever.retrieve_or_broaden(store, request).await
            } else {
                retriever.retrieve(store, request).await
            };
            retrieval.map_err(anyhow::Error::from)
        })
        .await
    }

    /// Builds the request, pinning it to the newest manifest entry when
    /// `--latest` is set.
    fn request_for(&self, args: &RetrieveArgs) -> Result<RetrieveRequest> {
        let request = args.to_request(&self.config.retrieval)?;
        if !args.latest {
            return Ok(request);
        }
        let latest = self
            .manifest()
            .latest(request.namespace.as_deref())
            .ok_or_else(|| anyhow!("No document ingested yet"))?;
        log::debug!("Using latest document {}", latest.doc_id);
        Ok(request.doc_ids([latest.doc_id]))
    }

    pub(crate) async fn query(&self, args: RetrieveArgs) -> Result<()> {
        let request = self.request_for(&args)?;
        let providers = self.providers()?;
        let retriever = self.retriever(&providers);
        let mut store = self.open_store();

        let retrieval = self
            .retrieve(&retriever, &mut store, &request, !args.no_broaden)
            .await?;
        self.emit(&retrieval)
    }

    pub(crate) async fn answer(&self, args: RetrieveArgs) -> Result<()> {
        let request = self.request_for(&args)?;
        let providers = self.providers()?;
        let retriever = self.retriever(&providers);
        let mut store = self.open_store();

        let retrieval = self
            .retrieve(&retriever, &mut store, &request, !args.no_broaden)
            .await?;
        let answer = self
            .with_timeout(async {
                synthesize_answer(
                    providers.generator.as_ref(),
                    &request.query,
                    &retrieval,
                    self.config.retrieval.answer_temperature,
                    self.config.retrieval.answer_max_tokens,
                )
                .await
                .map_err(anyhow::Error::from)
            })
            .await?;
        self.emit(&answer)
    }

    pub(crate) fn docs(&self, args: DocsArgs) -> Result<()> {
        let namespace = args.namespace.as_deref();
        let documents = self
            .manifest()
            .load()
            .into_iter()
            .filter(|doc| namespace.is_none() || doc.namespace.as_deref() == namespace)
            .collect();
        let indexed = self.open_store().list_documents(namespace);
        self.emit(&DocsOutput { documents, indexed })
    }

    pub(crate) fn delete(&self, args: DeleteArgs) -> Result<()> {
        let mut store = self.open_store();
        let removed_records = store.delete_by_doc_ids(args.doc_ids.as_slice())?;

        let manifest = self.manifest();
        let mut removed_documents = 0;
        for doc_id in &args.doc_ids {
            if manifest.delete_document(doc_id)? {
                removed_documents += 1;
            }
        }
        self.emit(&RemovalOutput {
            removed_records,
            removed_documents,
        })
    }

    pub(crate) fn clear(&self, args: ClearArgs) -> Result<()> {
        anyhow::ensure!(
            args.all || args.namespace.is_some(),
            "Pass --namespace <NS> or --all"
        );
        let namespace = args.namespace.as_deref();

        let mut store = self.open_store();
        let removed_records = store.clear_namespace(namespace)?;

        let manifest = self.manifest();
        let documents = manifest.load();
        let before = documents.len();
        let kept: Vec<DocumentEntry> = documents
            .into_iter()
            .filter(|doc| namespace.is_some() && doc.namespace.as_deref() != namespace)
            .collect();
        let removed_documents = before - kept.len();
        if removed_documents > 0 {
            manifest.save(&kept)?;
        }

        self.emit(&RemovalOutput {
            removed_records,
            removed_documents,
        })
    }

    pub(crate) fn info(&self) -> Result<()> {
        let store = self.open_store();
        self.emit(&InfoOutput {
            data_dir: self.data_dir.clone(),
            provider: self.config.provider.mode.as_str(),
            manifest_documents: self.manifest().load().len(),
            store: store.info(),
        })
    }
}

fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read chunks from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chunks file {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| {
        format!(
            "Chunks file {} must be a JSON array of {{id, text, page}}",
            path.display()
        )
    })
}
