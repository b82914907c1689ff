// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Dashboard page templates

pub const BASE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    {% if refresh %}<meta http-equiv="refresh" content="{{ refresh }}">{% endif %}
    <title>{{ title }} - BI Copilot</title>
    <style>
        :root {
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #e94560;
            --success: #00d9a5;
            --warning: #f5a623;
            --border: #2a2a4a;
        }
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }
        .container { max-width: 1400px; margin: 0 auto; padding: 20px; }
        nav {
            background: var(--bg-secondary);
            padding: 15px 20px;
            display: flex;
            align-items: center;
            gap: 30px;
            border-bottom: 1px solid var(--border);
        }
        nav .logo { font-size: 1.5em; font-weight: bold; color: var(--accent); text-decoration: none; }
        nav a { color: var(--text-secondary); text-decoration: none; }
        nav a:hover { color: var(--text-primary); }
        h1 { margin-bottom: 20px; }
        .card { background: var(--bg-card); border-radius: 12px; padding: 20px; margin-bottom: 20px; }
        .card h2 { margin-bottom: 15px; color: var(--accent); }
        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }
        .stat-card { background: var(--bg-card); border-radius: 12px; padding: 20px; text-align: center; }
        .stat-card .number { font-size: 2.5em; font-weight: bold; color: var(--accent); }
        .stat-card .label { color: var(--text-secondary); font-size: 0.9em; }
        table { width: 100%; border-collapse: collapse; }
        th, td { padding: 10px; text-align: left; border-bottom: 1px solid var(--border); }
        th { color: var(--text-secondary); font-weight: 500; }
        .badge {
            display: inline-block;
            padding: 2px 10px;
            border-radius: 12px;
            font-size: 0.8em;
            background: var(--bg-secondary);
            border: 1px solid var(--border);
        }
        .badge.completed { border-color: var(--success); color: var(--success); }
        .badge.failed { border-color: var(--accent); color: var(--accent); }
        .badge.processing { border-color: var(--warning); color: var(--warning); }
        .progress { height: 10px; background: var(--bg-secondary); border-radius: 5px; overflow: hidden; }
        .progress-fill { height: 100%; background: var(--success); }
        .charts { display: grid; grid-template-columns: repeat(auto-fit, minmax(420px, 1fr)); gap: 20px; }
        .charts figure { background: #fff; border-radius: 8px; padding: 8px; }
        .charts img { width: 100%; }
        .charts figcaption { color: #333; font-size: 0.85em; text-align: center; }
        input, select, textarea, button {
            font: inherit;
            padding: 8px 12px;
            border-radius: 6px;
            border: 1px solid var(--border);
            background: var(--bg-secondary);
            color: var(--text-primary);
        }
        button { background: var(--accent); border: none; cursor: pointer; }
        .error { color: var(--accent); }
        .muted { color: var(--text-secondary); }
        pre { white-space: pre-wrap; background: var(--bg-secondary); padding: 12px; border-radius: 6px; }
    </style>
</head>
<body>
    <nav>
        <a href="/" class="logo">BI Copilot</a>
        <a href="/">Upload</a>
        <a href="/reports">Reports</a>
    </nav>
    <main class="container">
        {% block content %}{% endblock %}
    </main>
</body>
</html>"#;

pub const INDEX: &str = r#"{% extends "base.html" %}
{% block content %}
<h1>AI Business Intelligence Copilot</h1>
{% if error %}<div class="card error">{{ error }}</div>{% endif %}
<div class="card">
    <h2>Upload a dataset</h2>
    <form action="/upload" method="post" enctype="multipart/form-data">
        <p><input type="file" name="file" accept=".csv,.xls,.xlsx,.xlsm,.ods" required></p>
        <p>
            <select name="analysis_type">
                <option value="full">Full analysis</option>
                <option value="quick">Quick analysis</option>
            </select>
            <select name="report_type">
                <option value="pdf">PDF report</option>
                <option value="markdown">Markdown report</option>
            </select>
            <button type="submit">Analyze</button>
        </p>
    </form>
</div>
<div class="card">
    <h2>Recent analyses</h2>
    {% if tasks %}
    <table>
        <tr><th>File</th><th>Type</th><th>Status</th><th>Started</th></tr>
        {% for t in tasks %}
        <tr>
            <td><a href="/dashboard/{{ t.id }}">{{ t.filename }}</a></td>
            <td>{{ t.analysis_type }}</td>
            <td><span class="badge {{ t.status }}">{{ t.status }}</span></td>
            <td>{{ t.created_at[:16] }}</td>
        </tr>
        {% endfor %}
    </table>
    {% else %}
    <p class="muted">No analyses yet.</p>
    {% endif %}
</div>
{% endblock %}"#;

pub const DASHBOARD: &str = r#"{% extends "base.html" %}
{% block content %}
<h1>{{ task.filename }}</h1>
<div class="card">
    <h2>Status</h2>
    <p><span class="badge {{ task.status }}">{{ task.status }}</span>
       {% if task.current_agent %}<span class="muted">{{ task.current_agent }}</span>{% endif %}</p>
    <div class="progress"><div class="progress-fill" style="width: {{ (task.progress * 100) | round | int }}%"></div></div>
    {% if task.error %}<p class="error">{{ task.error }}</p>{% endif %}
</div>

{% if results %}
{% set s = results.summary %}
{% if s %}
<div class="stats-grid">
    <div class="stat-card"><div class="number">{{ s.rows }}</div><div class="label">Rows</div></div>
    <div class="stat-card"><div class="number">{{ s.columns }}</div><div class="label">Columns</div></div>
    {% if results.data_quality %}
    <div class="stat-card"><div class="number">{{ results.data_quality.quality_score }}</div><div class="label">Quality score</div></div>
    {% endif %}
</div>
<div class="card">
    <h2>Overview</h2>
    {% if s.semantic %}<p>{{ s.semantic.description }}</p>{% endif %}
    <table>
        <tr><th>Column</th><th>Type</th><th>Missing</th></tr>
        {% for name, kind in s.schema | items %}
        <tr><td>{{ name }}</td><td>{{ kind }}</td><td>{{ s.missing_values[name] }}</td></tr>
        {% endfor %}
    </table>
</div>
{% endif %}

{% if results.data_quality %}
<div class="card">
    <h2>Data quality</h2>
    <p>Missing values: {{ results.data_quality.missing_values.total_missing }},
       duplicate rows: {{ results.data_quality.duplicates.count }}</p>
    {% for issue in results.data_quality.inconsistencies %}<p class="error">{{ issue }}</p>{% endfor %}
</div>
{% endif %}

{% if results.statistical_analysis %}
<div class="card">
    <h2>Statistics</h2>
    <table>
        <tr><th>Column</th><th>Mean</th><th>Std</th><th>Min</th><th>Max</th></tr>
        {% for name, d in results.statistical_analysis.descriptive_stats.numeric | items %}
        <tr><td>{{ name }}</td><td>{{ d.mean | num }}</td><td>{{ d.std | num }}</td><td>{{ d.min | num }}</td><td>{{ d.max | num }}</td></tr>
        {% endfor %}
    </table>
    {% set corr = results.statistical_analysis.correlations %}
    {% if corr.strong_correlations %}
    <h3>Strong correlations</h3>
    <ul>{% for c in corr.strong_correlations %}<li>{{ c.col1 }} / {{ c.col2 }}: {{ c.correlation | num }}</li>{% endfor %}</ul>
    {% endif %}
</div>
{% endif %}

{% if charts %}
<div class="card">
    <h2>Charts</h2>
    <div class="charts">
    {% for c in charts %}
        <figure><img src="{{ c.src }}" alt="{{ c.title }}"><figcaption>{{ c.title }}</figcaption></figure>
    {% endfor %}
    </div>
</div>
{% endif %}

{% if results.forecast %}
<div class="card">
    <h2>Forecast</h2>
    {% if results.forecast.status == "success" %}
    <p>{{ results.forecast.target_column }} by {{ results.forecast.date_column }}
       (MAE {{ results.forecast.metrics.mae }}, RMSE {{ results.forecast.metrics.rmse }})</p>
    <table>
        <tr><th>Date</th><th>Forecast</th><th>Lower</th><th>Upper</th></tr>
        {% for r in results.forecast.forecast_data[:7] %}
        <tr><td>{{ r.ds }}</td><td>{{ r.yhat | num }}</td><td>{{ r.yhat_lower | num }}</td><td>{{ r.yhat_upper | num }}</td></tr>
        {% endfor %}
    </table>
    {% else %}
    <p class="muted">{{ results.forecast.reason or results.forecast.error }}</p>
    {% endif %}
</div>
{% endif %}

{% if results.report %}
<div class="card">
    <h2>Report</h2>
    <p>{{ results.report.executive_summary }}</p>
    {% if report.report_url %}<p><a href="{{ report.report_url }}">Download report</a>
       &middot; <a href="{{ report.markdown_url }}">Markdown</a></p>{% endif %}
</div>
{% endif %}
{% endif %}

{% if task.status != "processing" %}
<div class="card">
    <h2>Ask a question</h2>
    <form action="/query/{{ task.id }}" method="post">
        <p><input type="text" name="question" size="80" placeholder="e.g. show total sales by region" required>
        <button type="submit">Ask</button></p>
    </form>
</div>
<div class="card">
    <h2>Was this analysis useful?</h2>
    <form action="/feedback/{{ task.id }}" method="post">
        <p><input type="text" name="comment" size="60" placeholder="Optional comment">
        <button type="submit" name="rating" value="true">&#128077;</button>
        <button type="submit" name="rating" value="false">&#128078;</button></p>
    </form>
    {% if feedback_sent %}<p class="muted">Thanks for the feedback.</p>{% endif %}
</div>
{% endif %}
{% endblock %}"#;

pub const QUERY: &str = r#"{% extends "base.html" %}
{% block content %}
<h1>Question</h1>
<div class="card">
    <p><strong>{{ question }}</strong> <span class="badge">{{ route }}</span></p>
    <p><a href="/dashboard/{{ task_id }}">Back to dashboard</a></p>
</div>
<div class="card">
    {% if answer.error %}
    <p class="error">{{ answer.error }}</p>
    {% if answer.sql %}<pre>{{ answer.sql }}</pre>{% endif %}
    {% elif route == "sql" %}
    <h2>Result</h2>
    <pre>{{ answer.sql }}</pre>
    <p class="muted">{{ answer.row_count }} row(s){% if answer.truncated %}, truncated{% endif %}</p>
    {% if answer.result %}
    <table>
        <tr>{% for col in answer.result[0] %}<th>{{ col }}</th>{% endfor %}</tr>
        {% for row in answer.result %}
        <tr>{% for col in row %}<td>{{ row[col] | num }}</td>{% endfor %}</tr>
        {% endfor %}
    </table>
    {% endif %}
    {% else %}
    <h2>Answer</h2>
    <pre>{{ answer.answer }}</pre>
    {% endif %}
</div>
{% endblock %}"#;

pub const REPORTS: &str = r#"{% extends "base.html" %}
{% block content %}
<h1>Reports</h1>
{% if error %}<div class="card error">{{ error }}</div>{% endif %}
<div class="card">
    <table>
        <tr><th>File</th><th>Status</th><th>Report</th></tr>
        {% for r in reports %}
        <tr>
            <td><a href="/dashboard/{{ r.task.id }}">{{ r.task.filename }}</a></td>
            <td><span class="badge {{ r.task.status }}">{{ r.task.status }}</span></td>
            <td>{% if r.report.report_url %}<a href="{{ r.report.report_url }}">Download</a>
                &middot; <a href="{{ r.report.markdown_url }}">Markdown</a>{% else %}<span class="muted">-</span>{% endif %}</td>
        </tr>
        {% endfor %}
    </table>
</div>
{% endblock %}"#;


pub const ERROR: &str = r#"{% extends "base.html" %}
{% block content %}
<h1>{{ title }}</h1>
<div class="card error">{{ message }}</div>
<p><a href="/">Back to upload</a></p>
{% endblock %}"#;
