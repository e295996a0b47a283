//! Stub browser globals evaluated ahead of the page scripts.
//!
//! Page scripts expect a module loader (`require`, `requireLazy`, `__d`),
//! a pagelet pipe (`bigPipe`) and a handful of DOM objects. The loader
//! returns fixed emulation objects whose interesting methods forward to
//! the bridge functions; everything else is inert. A bridge that is not
//! installed for the current pass is skipped.

/// Global names defined by [`PRELUDE`], mostly for tests and diagnostics.
pub const STUB_GLOBALS: &[&str] = &[
    "window",
    "document",
    "navigator",
    "location",
    "console",
    "performance",
    "setTimeout",
    "require",
    "requireLazy",
    "bigPipe",
    "Bootloader",
    "CavalryLogger",
    "__d",
    "HTMLElement",
    "XMLHttpRequest",
];

pub const PRELUDE: &str = r#"
var window = globalThis, self = globalThis, top = globalThis, parent = globalThis;

(function (global) {
  function noop() {}

  function bridge(name) {
    var fn = global[name];
    if (typeof fn === "function") {
      fn.apply(null, Array.prototype.slice.call(arguments, 1));
    }
  }

  function own(object, key) {
    return Object.prototype.hasOwnProperty.call(object, key);
  }

  function makeElement() {
    return {
      style: {},
      dataset: {},
      childNodes: [],
      setAttribute: noop,
      getAttribute: function () { return null; },
      appendChild: function (child) { return child; },
      removeChild: function (child) { return child; },
      addEventListener: noop,
      removeEventListener: noop
    };
  }

  var placeholders = [
    "HTMLElement", "Element", "Node", "Event", "CustomEvent", "XMLHttpRequest",
    "Image", "MutationObserver", "DOMParser", "Worker", "WebSocket", "FormData",
    "Blob", "URL", "Headers"
  ];
  for (var p = 0; p < placeholders.length; p++) {
    if (typeof global[placeholders[p]] === "undefined") {
      global[placeholders[p]] = function () {};
    }
  }

  var body = makeElement();
  global.document = {
    cookie: "",
    readyState: "complete",
    body: body,
    head: makeElement(),
    documentElement: makeElement(),
    createElement: makeElement,
    createTextNode: makeElement,
    getElementById: function () { return null; },
    getElementsByTagName: function () { return []; },
    querySelector: function () { return null; },
    querySelectorAll: function () { return []; },
    addEventListener: noop,
    removeEventListener: noop
  };
  global.navigator = { userAgent: "Mozilla/5.0", language: "en-US", platform: "Linux x86_64", cookieEnabled: true };
  global.location = { href: "", protocol: "https:", host: "", hostname: "", pathname: "/", search: "", hash: "" };
  if (typeof global.console === "undefined") {
    global.console = { log: noop, info: noop, warn: noop, error: noop, debug: noop };
  }
  global.performance = { now: function () { return Date.now(); }, mark: noop, measure: noop, timing: {} };

  var nextTimer = 1;
  global.setTimeout = function () { return nextTimer++; };
  global.setInterval = global.setTimeout;
  global.clearTimeout = noop;
  global.clearInterval = noop;
  global.requestAnimationFrame = global.setTimeout;
  global.addEventListener = noop;
  global.removeEventListener = noop;

  function dispatchDefine(entry) {
    if (!entry || typeof entry.length !== "number") {
      return;
    }
    var data = entry[2] || {};
    switch (entry[0]) {
      case "CurrentUserInitialData":
        bridge("setUserData", data.USER_ID, data.NAME, data.SHORT_NAME);
        break;
      case "DTSGInitialData":
        bridge("setAuthToken", data.token);
        break;
      case "SiteData":
        bridge("setSiteData", "__hs", data.haste_session, "__spin_r", data.__spin_r);
        break;
      case "SprinkleConfig":
        bridge("setSprinkleName", data.param_name);
        break;
    }
    if (typeof entry[3] === "number") {
      bridge("setFeatureFlag", entry[3]);
    }
  }

  function dispatchRequire(entry) {
    if (!entry || entry[0] !== "CookieCore") {
      return;
    }
    var args = entry[3] || [];
    if (args[0] === "_js_datr") {
      bridge("setSessionCookie", args[1]);
    }
  }

  function dispatchResources(map) {
    if (!map) {
      return;
    }
    for (var key in map) {
      if (own(map, key) && map[key] && map[key].src) {
        bridge("setResource", key, map[key].src);
      }
    }
  }

  function handlePayload(payload) {
    if (!payload) {
      return;
    }
    var i;
    var defines = payload.define || [];
    for (i = 0; i < defines.length; i++) {
      dispatchDefine(defines[i]);
    }
    var requires = payload.require || [];
    for (i = 0; i < requires.length; i++) {
      dispatchRequire(requires[i]);
    }
    dispatchResources(payload.resource_map || payload.rsrcMap);
  }

  function ServerJS() {}
  ServerJS.prototype.handle = function (payload) { handlePayload(payload); return this; };
  ServerJS.prototype.handleDefines = function (defines) { handlePayload({ define: defines }); return this; };
  ServerJS.prototype.setRelativeTo = function () { return this; };
  ServerJS.handle = handlePayload;
  ServerJS.handleDefines = function (defines) { handlePayload({ define: defines }); };

  var Bootloader = {
    setResourceMap: dispatchResources,
    handlePayload: handlePayload,
    loadResources: noop,
    enableBootload: noop,
    markComponentsAsImmediate: noop,
    done: noop
  };

  var CavalryLogger = {
    setPageID: noop,
    start_js: noop,
    getInstance: function () { return CavalryLogger; }
  };

  var modules = {
    ServerJS: ServerJS,
    Bootloader: Bootloader,
    CavalryLogger: CavalryLogger,
    CookieCore: {
      set: function (name, value) {
        if (name === "_js_datr") {
          bridge("setSessionCookie", value);
        }
      }
    }
  };

  var genericModule = {
    guard: function (fn) { return fn; },
    handle: noop,
    handleDefines: noop,
    handleServerJS: handlePayload,
    init: noop,
    setPageID: noop
  };

  global.require = function (id) {
    return own(modules, id) ? modules[id] : genericModule;
  };

  global.requireLazy = function (ids, callback) {
    if (typeof callback !== "function") {
      return;
    }
    var resolved = [];
    for (var i = 0; i < (ids || []).length; i++) {
      resolved.push(global.require(ids[i]));
    }
    callback.apply(null, resolved);
  };

  global.bigPipe = {
    onPageletArrive: function (data) {
      if (data) {
        handlePayload(data.jsmods);
        dispatchResources(data.resource_map);
      }
    },
    beforePageletArrive: noop,
    setPageID: noop
  };

  global.Bootloader = Bootloader;
  global.CavalryLogger = CavalryLogger;

  global.__d = function (name, deps, factory) {
    if (typeof factory !== "function") {
      return;
    }
    var module = { exports: {} };
    factory(global, global.require, global.require, global.requireLazy, module, module.exports);
    var exported = module.exports || {};
    var id = exported.id;
    if (id === undefined && exported.params) {
      id = exported.params.id;
    }
    if (typeof id === "string" || typeof id === "number") {
      bridge("setDocumentID", name, String(id));
    }
  };
})(globalThis);
"#;
