//! Contract Invariant Tests
//!
//! These tests verify the guarantees the render cache is built on.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use viewforge_core::{
    canonical_json, compile_source, content_hash, extract_balanced,
    ir::{parse_artifact, Node},
    manifest::MANIFEST_FILE,
    Artifact, CacheMode, CompileError, FsStore, ViewCache, ViewError, ViewsDir,
};

struct Site {
    _dir: TempDir,
    views: PathBuf,
    cache: PathBuf,
}

impl Site {
    fn new(views: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let site = Site { views: dir.path().join("views"), cache: dir.path().join("cache"), _dir: dir };
        for (name, source) in views {
            site.write(name, source);
        }
        site
    }

    fn write(&self, name: &str, source: &str) {
        let path = self.views.join(format!("{}.tpl", name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }

    fn view_cache(&self) -> ViewCache {
        ViewCache::new(ViewsDir::new(&self.views, "tpl"), FsStore::new(&self.cache))
    }

    fn cached(&self, file: &str) -> PathBuf {
        self.cache.join(file)
    }
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn read_artifact(path: &Path) -> Artifact {
    parse_artifact(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn invariant_directive_free_text_is_unchanged() {
    let text = "<p>Plain { text } with a mail@example.com address, ünïcödé and 100% (parens)</p>\n";
    let artifact = compile_source("plain", text).unwrap();
    assert_eq!(artifact.nodes, vec![Node::Text { text: text.to_string() }]);

    let site = Site::new(&[("plain", text)]);
    assert_eq!(site.view_cache().render("plain", Map::new()).unwrap(), text);
}

#[test]
fn invariant_compilation_is_deterministic() {
    let source = "@foreach($items as $k => $v)\n<li>{{ $k }}: {{ $v }}</li>\n@endforeach\n@view('footer')";
    let first = compile_source("list", source).unwrap();
    let second = compile_source("list", source).unwrap();
    assert_eq!(first, second);
    assert_eq!(canonical_json(&first).unwrap(), canonical_json(&second).unwrap());
    assert_eq!(first.hash, content_hash(source));
}

#[test]
fn invariant_one_byte_change_selects_new_artifact() {
    let site = Site::new(&[("greet", "Hello {{ $name }}!")]);
    let mut cache = site.view_cache();
    let before = cache.create_caches().unwrap();
    let old_file = before.list["greet"].clone();

    site.write("greet", "Hello {{ $name }}?");
    let after = cache.create_caches().unwrap();
    let new_file = after.list["greet"].clone();

    assert_ne!(old_file, new_file);
    assert!(site.cached(&old_file).is_file(), "stale artifact is orphaned, not deleted");
    assert!(site.cached(&new_file).is_file());
    assert_ne!(before.static_list["greet"], after.static_list["greet"]);
    assert_eq!(cache.render("greet", params(json!({"name": "Ada"}))).unwrap(), "Hello Ada?");
}

#[test]
fn invariant_artifact_is_written_once() {
    let site = Site::new(&[("greet", "Hello {{ $name }}!")]);
    let handle = site.view_cache().compile("greet").unwrap();
    let path = site.cached(&handle.file);
    let written = fs::read_to_string(&path).unwrap();

    let mut other = site.view_cache();
    let again = other.compile("greet").unwrap();
    assert_eq!(other.compilations(), 0);
    assert_eq!(again.artifact, handle.artifact);
    assert_eq!(fs::read_to_string(&path).unwrap(), written);
}

#[test]
fn invariant_nested_parentheses_are_balanced() {
    let source = "@if(foo(a,b) && bar(c))yes @endif";
    assert_eq!(extract_balanced(source, 3), Some("(foo(a,b) && bar(c))"));

    let artifact = compile_source("cond", source).unwrap();
    let Node::If { branches, .. } = &artifact.nodes[0] else { panic!("expected @if block") };
    assert_eq!(branches[0].body, vec![Node::Text { text: "yes ".to_string() }]);
}

#[test]
fn invariant_unbalanced_parentheses_are_fatal() {
    let err = compile_source("home", "@if(foo(a,b").unwrap_err();
    assert!(matches!(err, CompileError::UnbalancedParens { ref template, ref directive, line: 1 }
        if template == "home" && directive == "if"));

    let site = Site::new(&[("home", "<h1>\n@if(foo(a,b")]);
    let mut cache = site.view_cache();
    assert!(matches!(cache.render("home", Map::new()), Err(ViewError::Compile(_))));
    assert_eq!(cache.compilations(), 0);
}

#[test]
fn invariant_output_is_escaped_unless_raw() {
    let site = Site::new(&[("escaped", r#"{{ "<b>x</b>" }}"#), ("raw", r#"{!! "<b>x</b>" !!}"#)]);
    let mut cache = site.view_cache();
    assert_eq!(cache.render("escaped", Map::new()).unwrap(), "&lt;b&gt;x&lt;/b&gt;");
    assert_eq!(cache.render("raw", Map::new()).unwrap(), "<b>x</b>");
}

#[test]
fn invariant_literal_includes_are_inlined_dynamic_kept() {
    let site = Site::new(&[
        ("page", "<main>@view('partials/nav', ['active' => $page])</main>@view('alerts/' . $kind)"),
        ("partials/nav", "<nav>{{ $active }}</nav>"),
        ("alerts/info", "(i)"),
    ]);
    let mut cache = site.view_cache();
    let manifest = cache.create_caches().unwrap();

    let compiled = read_artifact(&site.cached(&manifest.list["page"]));
    assert_eq!(compiled.includes().len(), 2);

    let flattened = read_artifact(&site.cached(&manifest.static_list["page"]));
    let remaining: Vec<_> = flattened.includes().iter().map(|e| e.as_literal_str()).collect();
    assert_eq!(remaining, vec![None], "only the computed include stays");

    let mut cache = site.view_cache().with_mode(CacheMode::Static);
    let out = cache.render("page", params(json!({"page": "home", "kind": "info"}))).unwrap();
    assert_eq!(out, "<main><nav>home</nav></main>(i)");
    assert_eq!(cache.compilations(), 0);
}

#[test]
fn invariant_greet_end_to_end() {
    let site = Site::new(&[("greet", "Hello {{ $name }}!")]);
    let mut cache = site.view_cache();

    assert_eq!(cache.render("greet", params(json!({"name": "Ada"}))).unwrap(), "Hello Ada!");
    assert_eq!(cache.compilations(), 1);

    assert_eq!(cache.render("greet", params(json!({"name": "Grace"}))).unwrap(), "Hello Grace!");
    assert_eq!(cache.compilations(), 1);
}

#[test]
fn invariant_missing_manifest_triggers_one_rebuild() {
    let site = Site::new(&[("greet", "Hello {{ $name }}!")]);
    let mut cache = site.view_cache().with_mode(CacheMode::Static);
    assert!(!site.cached(MANIFEST_FILE).exists());

    assert_eq!(cache.render("greet", params(json!({"name": "Ada"}))).unwrap(), "Hello Ada!");
    assert!(site.cached(MANIFEST_FILE).is_file());

    fs::write(site.cached(MANIFEST_FILE), r#"{"created_at": 1"#).unwrap();
    let mut fresh = site.view_cache().with_mode(CacheMode::Static);
    assert_eq!(fresh.render("greet", params(json!({"name": "Bo"}))).unwrap(), "Hello Bo!");
}

#[test]
fn invariant_missing_static_file_triggers_rebuild() {
    let site = Site::new(&[("greet", "Hi")]);
    let mut cache = site.view_cache().with_mode(CacheMode::Static);
    let manifest = cache.create_caches().unwrap();
    fs::remove_file(site.cached(&manifest.static_list["greet"])).unwrap();

    assert_eq!(cache.render("greet", Map::new()).unwrap(), "Hi");
    assert!(site.cached(&manifest.static_list["greet"]).is_file());
}

#[test]
fn invariant_unknown_view_is_fatal_without_rebuild() {
    let site = Site::new(&[("greet", "Hi")]);
    let mut cache = site.view_cache().with_mode(CacheMode::Static);
    let manifest = cache.create_caches().unwrap();
    let before = fs::read_to_string(site.cached(MANIFEST_FILE)).unwrap();

    assert!(matches!(cache.render("ghost", Map::new()), Err(ViewError::TemplateNotFound(_))));
    assert_eq!(fs::read_to_string(site.cached(MANIFEST_FILE)).unwrap(), before);
    assert!(site.cached(&manifest.list["greet"]).is_file());
    assert!(site.cached(&manifest.static_list["greet"]).is_file());
}

#[test]
fn invariant_deeply_nested_views_are_served_from_disk() {
    let source = format!("{}x{}", "@if(true) ".repeat(40), " @endif".repeat(40));
    let expected = format!("{}x{}", " ".repeat(40), " ".repeat(40));
    let site = Site::new(&[("deep", source.as_str())]);

    let mut first = site.view_cache();
    assert_eq!(first.render("deep", Map::new()).unwrap(), expected);
    assert_eq!(first.compilations(), 1);

    let mut second = site.view_cache();
    assert_eq!(second.render("deep", Map::new()).unwrap(), expected);
    assert_eq!(second.compilations(), 0, "compiled artifact is read back");

    let mut builder = site.view_cache();
    let manifest = builder.create_caches().unwrap();
    assert_eq!(read_artifact(&site.cached(&manifest.static_list["deep"])).hash.len(), 64);

    let mut statics = site.view_cache().with_mode(CacheMode::Static);
    assert_eq!(statics.render("deep", Map::new()).unwrap(), expected);
    assert_eq!(statics.compilations(), 0, "static artifact is read back");
}

#[test]
fn invariant_clear_removes_artifacts() {
    let site = Site::new(&[("a", "A"), ("b", "@view('a')")]);
    let mut cache = site.view_cache();
    cache.create_caches().unwrap();
    assert_eq!(cache.clear().unwrap(), 4);
    assert!(!site.cached(MANIFEST_FILE).exists());
    assert_eq!(fs::read_dir(&site.cache).unwrap().count(), 0);
}

#[test]
fn invariant_failed_render_returns_only_the_error() {
    let site = Site::new(&[("half", "visible {{ $missing }} never")]);
    let err = site.view_cache().render("half", Map::new()).unwrap_err();
    assert!(matches!(err, ViewError::Render { .. }));
    assert!(err.to_string().contains("missing"));
}
