//! In-page scripts evaluated through [`crate::page::Page::evaluate`].
//!
//! Every script is a self-invoking expression returning JSON-serializable
//! data. Arguments are embedded with `serde_json` so quoting is always safe.

use crate::page::Locator;

/// Attribute stamped on elements handed out by [`locate`].
pub const REF_ATTRIBUTE: &str = "data-wayline-ref";

fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

pub fn locate(locator: &Locator) -> String {
    let (mode, needle) = match locator {
        Locator::Css(s) => ("css", s.as_str()),
        Locator::XPath(s) => ("xpath", s.as_str()),
        Locator::Text(s) => ("text", s.as_str()),
        Locator::Attribute(s) => ("attribute", s.as_str()),
    };
    format!(
        r#"(() => {{
  const mode = {mode};
  const needle = {needle};
  const visible = (e) => {{
    const r = e.getBoundingClientRect();
    const s = window.getComputedStyle(e);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
  }};
  let el = null;
  try {{
    if (mode === 'css') {{
      el = document.querySelector(needle);
    }} else if (mode === 'xpath') {{
      el = document.evaluate(needle, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    }} else if (mode === 'text') {{
      const want = needle.trim().toLowerCase();
      const hits = Array.from(document.querySelectorAll('body *'))
        .filter(e => !['SCRIPT', 'STYLE', 'NOSCRIPT'].includes(e.tagName))
        .filter(e => (e.innerText || e.textContent || '').trim().toLowerCase().includes(want));
      const set = new Set(hits);
      const leaves = hits.filter(e => !Array.from(e.children).some(c => set.has(c)));
      el = leaves.find(visible) || leaves[0] || null;
    }} else if (mode === 'attribute') {{
      const want = needle.trim().toLowerCase();
      const attrs = ['aria-label', 'title', 'alt', 'placeholder'];
      el = Array.from(document.querySelectorAll('body *'))
        .find(e => attrs.some(a => (e.getAttribute(a) || '').toLowerCase().includes(want))) || null;
    }}
  }} catch (err) {{
    el = null;
  }}
  if (!el) return null;
  let ref = el.getAttribute('{attr}');
  if (!ref) {{
    window.__waylineRef = (window.__waylineRef || 0) + 1;
    ref = String(window.__waylineRef);
    el.setAttribute('{attr}', ref);
  }}
  return {{
    reference: ref,
    tag: el.tagName.toLowerCase(),
    text: (el.innerText || el.value || '').trim().slice(0, 200)
  }};
}})()"#,
        mode = js(mode),
        needle = js(needle),
        attr = REF_ATTRIBUTE,
    )
}

/// Focuses the referenced element and selects its contents.
pub fn select_contents(css: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({css});
  if (!el) return false;
  el.focus();
  if (typeof el.select === 'function') {{
    el.select();
  }} else {{
    const range = document.createRange();
    range.selectNodeContents(el);
    const sel = window.getSelection();
    sel.removeAllRanges();
    sel.addRange(range);
  }}
  return true;
}})()"#,
        css = js(css)
    )
}

pub const READY_STATE: &str = "document.readyState";
pub const LOCATION: &str = "window.location.href";
pub const TITLE: &str = "document.title";

pub fn inspect(css: &str, limit: usize) -> String {
    format!(
        r#"(() => {{
  let nodes = [];
  try {{ nodes = Array.from(document.querySelectorAll({css})).slice(0, {limit}); }} catch (err) {{ return []; }}
  return nodes.map(el => {{
    const tag = el.tagName.toLowerCase();
    const out = {{ tag, text: (el.innerText || el.textContent || '').trim().slice(0, 500) }};
    if (el.href) out.href = el.href;
    if (el.src) out.src = el.src;
    if (el.alt) out.alt = el.alt;
    if (tag === 'input' || tag === 'textarea' || tag === 'select') out.value = el.value || '';
    if (tag === 'select') out.options = Array.from(el.options).map(o => o.text.trim());
    const attributes = {{}};
    for (const name of ['id', 'class', 'name', 'type', 'role', 'aria-label']) {{
      const v = el.getAttribute(name);
      if (v) attributes[name] = v;
    }}
    out.attributes = attributes;
    return out;
  }});
}})()"#,
        css = js(css),
        limit = limit
    )
}

pub const SCAN_TABLES: &str = r#"(() => {
  return Array.from(document.querySelectorAll('table')).map((table, index) => {
    const cells = (row) => Array.from(row.querySelectorAll('th, td')).map(c => (c.innerText || c.textContent || '').trim());
    const rows = Array.from(table.querySelectorAll('tr'));
    let headers = [];
    const headRow = table.querySelector('thead tr') || rows.find(r => r.querySelector('th') && !r.querySelector('td'));
    if (headRow) headers = cells(headRow);
    const body = rows.filter(r => r !== headRow).map(cells).filter(r => r.length > 0).slice(0, 100);
    const caption = table.caption ? table.caption.innerText.trim() : undefined;
    return { index, caption, headers, rows: body };
  });
})()"#;

pub const ANALYZE: &str = r#"(() => {
  const count = (sel) => document.querySelectorAll(sel).length;
  const searchBox = document.querySelector(
    'input[type="search"], input[name*="search" i], input[placeholder*="search" i], input[aria-label*="search" i], [role="search"] input, input[name="q"]'
  );
  return {
    url: window.location.href,
    title: document.title,
    forms: count('form'),
    inputs: count('input:not([type="hidden"]), textarea, select'),
    buttons: count('button, input[type="submit"], input[type="button"], [role="button"]'),
    links: count('a[href]'),
    tables: count('table'),
    iframes: count('iframe'),
    hasSearchBox: !!searchBox
  };
})()"#;

pub const DETECT_FIELDS: &str = r#"(() => {
  const selectors = [
    'input[type="text"]', 'input[type="email"]', 'input[type="password"]', 'input[type="tel"]',
    'input[type="search"]', 'input[type="date"]', 'input:not([type])', 'textarea', 'select',
    '[contenteditable="true"]'
  ];
  const visible = (e) => {
    const r = e.getBoundingClientRect();
    const s = window.getComputedStyle(e);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
  };
  const seen = new Set();
  const fields = [];
  for (const sel of selectors) {
    for (const el of document.querySelectorAll(sel)) {
      if (seen.has(el) || !visible(el)) continue;
      seen.add(el);
      let ref = el.getAttribute('data-wayline-ref');
      if (!ref) {
        window.__waylineRef = (window.__waylineRef || 0) + 1;
        ref = String(window.__waylineRef);
        el.setAttribute('data-wayline-ref', ref);
      }
      let label = '';
      if (el.id) {
        const l = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
        if (l) label = l.textContent.trim();
      }
      if (!label && el.closest('label')) label = el.closest('label').textContent.trim();
      const parent = el.parentElement;
      const nearby = parent ? (parent.innerText || '').trim().slice(0, 200) : '';
      fields.push({
        selector: '[data-wayline-ref="' + ref + '"]',
        tag: el.tagName.toLowerCase(),
        inputType: el.type || el.tagName.toLowerCase(),
        name: el.name || '',
        id: el.id || '',
        placeholder: el.placeholder || '',
        label,
        nearbyText: nearby
      });
    }
  }
  return fields;
})()"#;

pub const PROBE_CHALLENGE: &str = r#"(() => {
  const signals = [];
  const frameHints = ['recaptcha', 'hcaptcha', 'challenges.cloudflare.com', 'turnstile', 'arkoselabs', 'funcaptcha', 'perimeterx', 'px-captcha'];
  for (const frame of document.querySelectorAll('iframe')) {
    const src = (frame.getAttribute('src') || '').toLowerCase();
    const hit = frameHints.find(h => src.includes(h));
    if (hit) signals.push('iframe:' + hit);
  }
  for (const sel of ['#challenge-form', '#px-captcha', '.g-recaptcha', '.h-captcha', '#cf-challenge-running']) {
    if (document.querySelector(sel)) signals.push('element:' + sel);
  }
  const text = (document.body ? document.body.innerText : '').toLowerCase().slice(0, 20000);
  const phrases = ['verify you are human', 'are you a robot', 'unusual traffic', 'press & hold', 'press and hold', 'checking your browser', 'access denied', 'complete the security check'];
  for (const p of phrases) {
    if (text.includes(p)) signals.push('text:' + p);
  }
  return { detected: signals.length > 0, signals };
})()"#;
