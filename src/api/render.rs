//! HTML Rendering
//!
//! Server-rendered pages and the panel fragments pushed over the websocket.
//! The pages carry a small inline script that subscribes to the room's
//! topics, swaps panel HTML in place and posts actions to the JSON API.

use crate::backend::{Meter, Side};
use crate::views::{ChecklistSnapshot, PetAction, PetSnapshot};

/// Escape text for HTML bodies and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn panel_color(side: Side) -> &'static str {
    match side {
        Side::Left => "#fce7f3",
        Side::Right => "#dcfce7",
    }
}

fn meter_color(meter: Meter) -> &'static str {
    match meter {
        Meter::Hunger => "#f87171",
        Meter::Happiness => "#facc15",
        Meter::Cleanliness => "#60a5fa",
    }
}

/// Inner HTML of one checklist panel
pub fn checklist_panel(snapshot: &ChecklistSnapshot) -> String {
    let mut html = String::new();
    html.push_str(&format!("<h2>{}</h2>", escape(&snapshot.label)));
    html.push_str(&format!(
        "<div class=\"coins\">Room Coins: <strong>{}</strong></div>",
        snapshot.coins
    ));

    html.push_str("<ul class=\"tasks\">");
    for task in &snapshot.tasks {
        let id = escape(task.id.as_str());
        html.push_str(&format!(
            "<li><label><input type=\"checkbox\" data-toggle=\"{id}\"{checked}> \
             <span class=\"{class}\">{title}</span></label>\
             <span class=\"reward\">{reward} coins</span>\
             <button class=\"remove\" data-remove=\"{id}\" title=\"Remove\">&#x2715;</button></li>",
            id = id,
            checked = if task.done { " checked" } else { "" },
            class = if task.done { "done" } else { "" },
            title = escape(&task.title),
            reward = task.reward,
        ));
    }
    html.push_str("</ul>");

    html.push_str(
        "<form class=\"add-task\">\
         <input name=\"title\" placeholder=\"New task\" required>\
         <input name=\"reward\" type=\"number\" min=\"1\" placeholder=\"Coins\" required>\
         <button type=\"submit\">Add</button></form>",
    );
    html
}

/// Inner HTML of the pet panel
pub fn pet_panel(snapshot: &PetSnapshot) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<h1>Virtual Cat, age {} d</h1>",
        snapshot.age_days
    ));

    for (meter, value) in [
        (Meter::Hunger, snapshot.hunger),
        (Meter::Happiness, snapshot.happiness),
        (Meter::Cleanliness, snapshot.cleanliness),
    ] {
        html.push_str(&format!(
            "<div class=\"meter\"><div class=\"meter-label\"><span>{label}</span><span>{value}%</span></div>\
             <div class=\"bar\"><div style=\"width:{value}%;background:{color}\"></div></div></div>",
            label = meter.label(),
            value = value,
            color = meter_color(meter),
        ));
    }

    html.push_str(&format!(
        "<img class=\"sprite\" src=\"{}\" alt=\"{}\">",
        escape(&snapshot.sprite),
        snapshot.animation.key()
    ));
    html.push_str(&format!(
        "<div class=\"coins\">Coins available: <strong>{}</strong></div>",
        snapshot.coins
    ));

    html.push_str("<div class=\"actions\">");
    for action in PetAction::ALL {
        let spec = action.spec();
        html.push_str(&format!(
            "<button data-action=\"{}\">{} ({})</button>",
            action.key(),
            spec.label,
            spec.price
        ));
    }
    html.push_str("</div>");
    html
}

const STYLE: &str = r#"
body { margin: 0; font-family: system-ui, sans-serif; }
.split { display: grid; grid-template-columns: 1fr 1fr; height: 100vh; }
.panel { display: flex; flex-direction: column; padding: 1.5rem; overflow-y: auto; }
.tasks { list-style: none; padding: 0; flex: 1; }
.tasks li { display: flex; justify-content: space-between; align-items: center; background: #fff;
  border-radius: 6px; box-shadow: 0 1px 2px rgba(0,0,0,.15); padding: .5rem .75rem; margin-bottom: .5rem; }
.done { text-decoration: line-through; color: #9ca3af; }
.reward { font-size: .85rem; background: #fef08a; border-radius: 4px; padding: 0 .5rem; margin-left: auto; margin-right: .5rem; }
.remove { color: #ef4444; background: none; border: none; cursor: pointer; }
.add-task { display: flex; gap: .5rem; }
.add-task input[name=title] { flex: 1; }
.add-task input[name=reward] { width: 5rem; }
.pet-page { min-height: 100vh; display: flex; align-items: center; justify-content: center; background: #f9fafb; }
#pet-panel { width: 100%; max-width: 28rem; text-align: center; }
.meter { margin-bottom: .75rem; }
.meter-label { display: flex; justify-content: space-between; font-size: .85rem; }
.bar { height: .75rem; background: #d1d5db; border-radius: 4px; }
.bar div { height: 100%; border-radius: 4px; }
.sprite { width: 320px; height: 320px; object-fit: contain; }
.actions { display: grid; grid-template-columns: 1fr 1fr; gap: .75rem; }
.actions button { padding: .5rem; background: #9333ea; color: #fff; border: none; border-radius: 6px; cursor: pointer; }
"#;

/// Client glue: subscribe, swap panels, post actions, alert on errors
const SCRIPT: &str = r#"
(function () {
  const room = document.body.dataset.room;
  const topics = JSON.parse(document.body.dataset.topics);
  const api = '/api/v1/rooms/' + encodeURIComponent(room);
  let lastSeq = Number(document.body.dataset.seq || 0);

  async function call(method, path, body) {
    const res = await fetch(api + path, {
      method,
      headers: body ? { 'Content-Type': 'application/json' } : {},
      body: body ? JSON.stringify(body) : undefined,
    });
    if (!res.ok) {
      let message = res.statusText;
      try { message = (await res.json()).error.message; } catch (_) {}
      alert(message);
    }
  }

  function connect() {
    const proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
    const ws = new WebSocket(proto + location.host + '/ws');
    ws.onopen = () => ws.send(JSON.stringify({ type: 'subscribe', topics }));
    ws.onmessage = (event) => {
      const msg = JSON.parse(event.data);
      if (msg.type === 'checklist') {
        const el = document.getElementById('panel-' + msg.snapshot.side);
        if (el) el.innerHTML = msg.html;
      } else if (msg.type === 'pet') {
        const el = document.getElementById('pet-panel');
        if (el) el.innerHTML = msg.html;
        if (msg.snapshot.sound && msg.snapshot.action_seq > lastSeq) {
          new Audio(msg.snapshot.sound).play().catch(() => {});
        }
        lastSeq = msg.snapshot.action_seq;
      }
    };
    ws.onclose = () => setTimeout(connect, 2000);
  }

  document.addEventListener('change', (e) => {
    const id = e.target.dataset.toggle;
    if (!id) return;
    const side = e.target.closest('.panel').dataset.side;
    call('POST', '/sides/' + side + '/tasks/' + encodeURIComponent(id) + '/toggle');
  });

  document.addEventListener('click', (e) => {
    const remove = e.target.dataset.remove;
    if (remove) {
      const side = e.target.closest('.panel').dataset.side;
      call('DELETE', '/sides/' + side + '/tasks/' + encodeURIComponent(remove));
    }
    const action = e.target.dataset.action;
    if (action) call('POST', '/pet/actions/' + action);
  });

  document.addEventListener('submit', (e) => {
    if (!e.target.classList.contains('add-task')) return;
    e.preventDefault();
    const form = e.target;
    const title = form.elements['title'].value.trim();
    const reward = Number(form.elements['reward'].value);
    if (!title || !(reward > 0)) return;
    const side = form.closest('.panel').dataset.side;
    call('POST', '/sides/' + side + '/tasks', { title, reward }).then(() => form.reset());
  });

  connect();
})();
"#;

fn page(title: &str, room: &str, topics: &[String], seq: u64, body: &str) -> String {
    let topics = serde_json::to_string(topics).unwrap_or_else(|_| "[]".to_string());
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title><style>{style}</style></head>\
         <body data-room=\"{room}\" data-topics=\"{topics}\" data-seq=\"{seq}\">{body}\
         <script>{script}</script></body></html>",
        title = escape(title),
        style = STYLE,
        room = escape(room),
        topics = escape(&topics),
        seq = seq,
        body = body,
        script = SCRIPT,
    )
}

/// Topic for one checklist panel
pub fn checklist_topic(room: &str, side: Side) -> String {
    format!("tasks.{}.{}", room, side)
}

/// Topic for a room's pet panel
pub fn pet_topic(room: &str) -> String {
    format!("pet.{}", room)
}

/// Two checklist panels side by side
pub fn checklist_page(room: &str, left: &ChecklistSnapshot, right: &ChecklistSnapshot) -> String {
    let panel = |snapshot: &ChecklistSnapshot| {
        format!(
            "<section class=\"panel\" id=\"panel-{side}\" data-side=\"{side}\" style=\"background:{color}\">{inner}</section>",
            side = snapshot.side,
            color = panel_color(snapshot.side),
            inner = checklist_panel(snapshot),
        )
    };
    let body = format!("<div class=\"split\">{}{}</div>", panel(left), panel(right));
    let topics = vec![checklist_topic(room, Side::Left), checklist_topic(room, Side::Right)];
    page("Couples To-Do", room, &topics, 0, &body)
}

pub fn pet_page(room: &str, snapshot: &PetSnapshot) -> String {
    let body = format!(
        "<div class=\"pet-page\"><div id=\"pet-panel\">{}</div></div>",
        pet_panel(snapshot)
    );
    page("Virtual Cat", room, &[pet_topic(room)], snapshot.action_seq, &body)
}
